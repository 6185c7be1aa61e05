//! C-ABI table backed by a loopback engine.
//!
//! The entry points are plain `extern "C"` functions without a context
//! argument, so the table serves the engine installed by the most recent
//! [`loopback_api_table`] call. Vectors are boxed `Vec<u8>`s.

use super::{EngineCore, LoopbackEngine};
use crate::codec::{ArrayKind, Payload};
use crate::dpf_error::EngineFailure;
use crate::transport::call::{Call, ObjectId, Reply};
use crate::transport::native::{
    ARRAY_BYTES, ARRAY_DOUBLE, ARRAY_INT, ARRAY_STRINGS, DpfVector, EventCallback, NATIVE_ABI_VERSION, NativeApiTable,
};
use crate::transport::loopback::store::EngineResult;
use libc::{c_char, c_int, c_void};
use log::debug;
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::Arc;

static NATIVE_ENGINE: Mutex<Option<Arc<EngineCore>>> = Mutex::new(None);

/// Function table serving `engine`; replaces the engine served so far.
pub fn loopback_api_table(engine: &LoopbackEngine) -> NativeApiTable {
    debug!("native shim now serves {}", engine.address());
    *NATIVE_ENGINE.lock() = Some(engine.core.clone());
    NativeApiTable {
        abi_version: NATIVE_ABI_VERSION,
        server_version,
        vector_new,
        vector_delete,
        vector_data,
        call: shim_call,
        upload_int,
        upload_double,
        upload_bytes,
        upload_strings,
        download,
        listen,
        free_error,
    }
}

fn engine() -> EngineResult<Arc<EngineCore>> {
    NATIVE_ENGINE
        .lock()
        .clone()
        .ok_or_else(|| EngineFailure::generic("no loopback engine behind the native table"))
}

fn array_code(kind: ArrayKind) -> c_int {
    match kind {
        ArrayKind::Int => ARRAY_INT,
        ArrayKind::Double => ARRAY_DOUBLE,
        ArrayKind::Bytes => ARRAY_BYTES,
        ArrayKind::Strings => ARRAY_STRINGS,
    }
}

unsafe fn slice<'a, T>(data: *const T, len: usize) -> &'a [T] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: the caller passes a buffer of `len` elements.
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

unsafe fn vector<'a>(vec: *mut DpfVector) -> Option<&'a mut Vec<u8>> {
    // SAFETY: every DpfVector handed out is a boxed Vec<u8>.
    unsafe { vec.cast::<Vec<u8>>().as_mut() }
}

unsafe fn decode(request: *const u8, request_size: usize) -> EngineResult<Call> {
    let bytes = unsafe { slice(request, request_size) };
    bincode::deserialize(bytes).map_err(|e| EngineFailure::invalid(format!("malformed request: {e}")))
}

fn encode_reply(reply: Reply) -> EngineResult<Vec<u8>> {
    bincode::serialize(&reply).map_err(|e| EngineFailure::generic(format!("cannot encode reply: {e}")))
}

/// Write the result into `out` and the error out-parameters.
unsafe fn report(result: EngineResult<Vec<u8>>, out: *mut DpfVector, error_size: *mut c_int, error_message: *mut *mut c_char) {
    let (bytes, failure) = match result {
        Ok(b) => (b, None),
        Err(f) => (bincode::serialize(&f).unwrap_or_default(), Some(f)),
    };
    if let Some(v) = unsafe { vector(out) } {
        *v = bytes;
    }
    let Some(f) = failure else { return };
    // SAFETY: out-parameters are either null or valid for writes.
    unsafe {
        if !error_size.is_null() {
            *error_size = 1;
        }
        if !error_message.is_null() {
            *error_message = CString::new(f.message.replace('\0', " ")).map_or(ptr::null_mut(), CString::into_raw);
        }
    }
}

unsafe extern "C" fn server_version(major: *mut c_int, minor: *mut c_int) {
    let version = engine().map(|core| core.version.clone()).unwrap_or_default();
    let mut parts = version.split('.').map(|p| p.trim().parse::<c_int>().unwrap_or(0));
    // SAFETY: out-parameters are valid for writes.
    unsafe {
        if !major.is_null() {
            *major = parts.next().unwrap_or(0);
        }
        if !minor.is_null() {
            *minor = parts.next().unwrap_or(0);
        }
    }
}

unsafe extern "C" fn vector_new() -> *mut DpfVector {
    Box::into_raw(Box::new(Vec::<u8>::new())).cast()
}

unsafe extern "C" fn vector_delete(vec: *mut DpfVector) {
    if !vec.is_null() {
        // SAFETY: `vec` came from `vector_new` and is deleted once.
        drop(unsafe { Box::from_raw(vec.cast::<Vec<u8>>()) });
    }
}

unsafe extern "C" fn vector_data(vec: *mut DpfVector, data: *mut *const u8, size: *mut usize) {
    let (p, n) = match unsafe { vector(vec) } {
        Some(v) => (v.as_ptr(), v.len()),
        None => (ptr::null(), 0),
    };
    // SAFETY: out-parameters are valid for writes.
    unsafe {
        if !data.is_null() {
            *data = p;
        }
        if !size.is_null() {
            *size = n;
        }
    }
}

unsafe extern "C" fn shim_call(
    request: *const u8,
    request_size: usize,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    let result = unsafe { decode(request, request_size) }
        .and_then(|call| engine()?.handle(call))
        .and_then(encode_reply);
    unsafe { report(result, reply, error_size, error_message) };
}

unsafe fn upload(
    request: *const u8,
    request_size: usize,
    payload: Payload,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    let result = unsafe { decode(request, request_size) }
        .and_then(|call| engine()?.handle_upload(call, payload))
        .and_then(encode_reply);
    unsafe { report(result, reply, error_size, error_message) };
}

unsafe extern "C" fn upload_int(
    request: *const u8,
    request_size: usize,
    data: *const i32,
    size: usize,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    unsafe {
        let payload = Payload::Int(slice(data, size).to_vec());
        upload(request, request_size, payload, reply, error_size, error_message);
    }
}

unsafe extern "C" fn upload_double(
    request: *const u8,
    request_size: usize,
    data: *const f64,
    size: usize,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    unsafe {
        let payload = Payload::Double(slice(data, size).to_vec());
        upload(request, request_size, payload, reply, error_size, error_message);
    }
}

unsafe extern "C" fn upload_bytes(
    request: *const u8,
    request_size: usize,
    data: *const u8,
    size: usize,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    unsafe {
        let payload = Payload::Bytes(slice(data, size).to_vec());
        upload(request, request_size, payload, reply, error_size, error_message);
    }
}

unsafe extern "C" fn upload_strings(
    request: *const u8,
    request_size: usize,
    data: *const *const c_char,
    count: usize,
    reply: *mut DpfVector,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    unsafe {
        let strings = slice(data, count)
            .iter()
            .map(|&p| {
                if p.is_null() {
                    String::new()
                } else {
                    CStr::from_ptr(p).to_string_lossy().into_owned()
                }
            })
            .collect();
        upload(request, request_size, Payload::Strings(strings), reply, error_size, error_message);
    }
}

unsafe extern "C" fn download(
    request: *const u8,
    request_size: usize,
    out: *mut DpfVector,
    array_kind: *mut c_int,
    count: *mut usize,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    let result = unsafe { decode(request, request_size) }.and_then(|call| engine()?.handle_download(call));
    let bytes = result.map(|payload| {
        // SAFETY: out-parameters are valid for writes.
        unsafe {
            if !array_kind.is_null() {
                *array_kind = array_code(payload.kind());
            }
            if !count.is_null() {
                *count = payload.len();
            }
        }
        payload.to_le_bytes()
    });
    unsafe { report(bytes, out, error_size, error_message) };
}

unsafe extern "C" fn listen(
    session: u64,
    callback: EventCallback,
    user: *mut c_void,
    error_size: *mut c_int,
    error_message: *mut *mut c_char,
) {
    let result = engine().and_then(|core| {
        core.listen(ObjectId(session), &mut |ev| match bincode::serialize(&ev) {
            // SAFETY: the callback contract is the caller's; the buffer lives for the call.
            Ok(bytes) => unsafe { callback(user, bytes.as_ptr(), bytes.len()) != 0 },
            Err(_) => false,
        })
    });
    unsafe { report(result.map(|()| Vec::new()), ptr::null_mut(), error_size, error_message) };
}

unsafe extern "C" fn free_error(message: *mut c_char) {
    if !message.is_null() {
        // SAFETY: messages are produced by `CString::into_raw` in `report`.
        drop(unsafe { CString::from_raw(message) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn version_comes_from_the_installed_engine() {
        let engine = LoopbackEngine::with_version("6.2");
        let table = loopback_api_table(&engine);
        let (mut major, mut minor) = (0, 0);
        unsafe { (table.server_version)(&mut major, &mut minor) };
        assert_eq!((major, minor), (6, 2));
    }

    #[test]
    #[serial]
    fn failures_fill_the_error_slot() {
        let engine = LoopbackEngine::new();
        let table = loopback_api_table(&engine);
        let request = bincode::serialize(&Call::Base(crate::transport::call::BaseCall::Describe { obj: ObjectId(999) })).unwrap();
        unsafe {
            let reply = (table.vector_new)();
            let mut size = 0;
            let mut message = ptr::null_mut();
            (table.call)(request.as_ptr(), request.len(), reply, &mut size, &mut message);
            assert_eq!(size, 1);
            assert!(!message.is_null());
            let text = CStr::from_ptr(message).to_string_lossy().into_owned();
            assert!(text.contains("no live object"));
            (table.free_error)(message);
            let encoded = vector(reply).unwrap().clone();
            let failure: EngineFailure = bincode::deserialize(&encoded).unwrap();
            assert_eq!(failure.code, crate::dpf_error::ErrorCode::NullObject);
            (table.vector_delete)(reply);
        }
    }
}
