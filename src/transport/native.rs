//! In-process backend over a C-ABI function table.
//!
//! The native library exports one symbol, [`API_TABLE_SYMBOL`], returning a
//! pointer to a [`NativeApiTable`]. Requests and replies cross the boundary
//! as bincode buffers; bulk arrays cross as typed pointers (`i32*`, `f64*`,
//! `char*`, `char**`). Every entry point reports failure through the
//! `(error_size, error_message)` out-parameters: a non-zero size means the
//! call failed and `error_message` holds a NUL-terminated string to be
//! released with `free_error`. On failure the reply vector may carry an
//! encoded `EngineFailure` with the precise error code.

use super::call::{BaseCall, Call, ObjectId, Reply, ServerInfo};
use super::{Backend, BackendId, ServerVersion, TransferOptions};
use crate::codec::{ArrayKind, Payload, ProgressGate};
use crate::config::{CommunicationProtocol, ServerConfig};
use crate::dpf_error::{DpfError, EngineFailure, TransportErrorKind};
use crate::session::ProgressEvent;
use libc::{c_char, c_int, c_void};
use log::{debug, info};
use std::ffi::{CStr, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

pub const NATIVE_ABI_VERSION: u32 = 1;
/// Exported entry point of a native engine library.
pub const API_TABLE_SYMBOL: &str = "dpf_client_api_table";

pub const ARRAY_INT: c_int = 0;
pub const ARRAY_DOUBLE: c_int = 1;
pub const ARRAY_BYTES: c_int = 2;
pub const ARRAY_STRINGS: c_int = 3;

/// Engine-owned contiguous buffer, exposed through `vector_data`.
#[repr(C)]
pub struct DpfVector {
    _opaque: [u8; 0],
}

pub type EventCallback =
    unsafe extern "C" fn(user: *mut c_void, event: *const u8, event_size: usize) -> c_int;

/// C-ABI function table of a native engine.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeApiTable {
    pub abi_version: u32,
    pub server_version: unsafe extern "C" fn(major: *mut c_int, minor: *mut c_int),
    pub vector_new: unsafe extern "C" fn() -> *mut DpfVector,
    pub vector_delete: unsafe extern "C" fn(vec: *mut DpfVector),
    pub vector_data: unsafe extern "C" fn(vec: *mut DpfVector, data: *mut *const u8, size: *mut usize),
    pub call: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        reply: *mut DpfVector,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    pub upload_int: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        data: *const i32,
        size: usize,
        reply: *mut DpfVector,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    pub upload_double: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        data: *const f64,
        size: usize,
        reply: *mut DpfVector,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    pub upload_bytes: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        data: *const u8,
        size: usize,
        reply: *mut DpfVector,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    pub upload_strings: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        data: *const *const c_char,
        count: usize,
        reply: *mut DpfVector,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    /// Fills `out` with the LE array bytes, `array_kind` with one of the
    /// `ARRAY_*` codes and `count` with the element (or string) count.
    pub download: unsafe extern "C" fn(
        request: *const u8,
        request_size: usize,
        out: *mut DpfVector,
        array_kind: *mut c_int,
        count: *mut usize,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    /// Invokes `callback` once per encoded event until the session closes
    /// or the callback returns 0.
    pub listen: unsafe extern "C" fn(
        session: u64,
        callback: EventCallback,
        user: *mut c_void,
        error_size: *mut c_int,
        error_message: *mut *mut c_char,
    ),
    pub free_error: unsafe extern "C" fn(message: *mut c_char),
}

impl fmt::Debug for NativeApiTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeApiTable")
            .field("abi_version", &self.abi_version)
            .finish_non_exhaustive()
    }
}

type ApiTableFn = unsafe extern "C" fn() -> *const NativeApiTable;

/// A `dlopen`ed engine library.
pub struct NativeLibrary {
    handle: *mut c_void,
    path: PathBuf,
}

// The handle is only used for dlsym/dlclose, both thread-safe.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

fn dl_error(context: &str) -> DpfError {
    // SAFETY: dlerror returns null or a thread-local C string.
    let msg = unsafe {
        let p = libc::dlerror();
        if p.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().into_owned()
        }
    };
    DpfError::transport(TransportErrorKind::Unavailable, format!("{context}: {msg}"))
}

impl NativeLibrary {
    pub fn open(path: &Path) -> Result<Self, DpfError> {
        let cpath = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| DpfError::InvalidArgument(format!("library path {path:?} contains NUL")))?;
        // SAFETY: cpath is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(dl_error(&format!("dlopen {}", path.display())));
        }
        debug!("loaded native engine {}", path.display());
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve and copy the exported function table.
    pub fn api_table(&self) -> Result<NativeApiTable, DpfError> {
        let name = CString::new(API_TABLE_SYMBOL)
            .map_err(|_| DpfError::InvalidArgument("symbol name contains NUL".into()))?;
        // SAFETY: handle is live for self's lifetime; name is NUL-terminated.
        let sym = unsafe { libc::dlsym(self.handle, name.as_ptr()) };
        if sym.is_null() {
            return Err(dl_error(&format!("dlsym {API_TABLE_SYMBOL}")));
        }
        // SAFETY: the exported symbol has the `ApiTableFn` signature by contract.
        let table = unsafe {
            let f: ApiTableFn = std::mem::transmute::<*mut c_void, ApiTableFn>(sym);
            f()
        };
        if table.is_null() {
            return Err(DpfError::transport(
                TransportErrorKind::Unavailable,
                format!("{API_TABLE_SYMBOL} returned null"),
            ));
        }
        // SAFETY: non-null pointer to a table that outlives the library handle.
        Ok(unsafe { *table })
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed once.
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

/// Owned `DpfVector`, deleted on drop.
struct VectorGuard<'t> {
    table: &'t NativeApiTable,
    ptr: *mut DpfVector,
}

impl<'t> VectorGuard<'t> {
    fn new(table: &'t NativeApiTable) -> Result<Self, DpfError> {
        // SAFETY: plain constructor.
        let ptr = unsafe { (table.vector_new)() };
        if ptr.is_null() {
            return Err(DpfError::transport(TransportErrorKind::Io, "vector_new returned null"));
        }
        Ok(Self { table, ptr })
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut data: *const u8 = ptr::null();
        let mut size = 0usize;
        // SAFETY: ptr is live; the engine reports a buffer of `size` bytes.
        unsafe {
            (self.table.vector_data)(self.ptr, &mut data, &mut size);
            if data.is_null() || size == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(data, size).to_vec()
            }
        }
    }
}

impl Drop for VectorGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: ptr came from vector_new and is deleted once.
        unsafe { (self.table.vector_delete)(self.ptr) }
    }
}

/// Out-parameters of every entry point.
struct ErrorSlot {
    size: c_int,
    message: *mut c_char,
}

impl ErrorSlot {
    fn new() -> Self {
        Self {
            size: 0,
            message: ptr::null_mut(),
        }
    }

    /// Translate the slot, consuming the engine-owned message.
    fn check(self, table: &NativeApiTable, reply: Option<&VectorGuard<'_>>) -> Result<(), DpfError> {
        let message = if self.message.is_null() {
            String::new()
        } else {
            // SAFETY: non-null engine string, released right after copying.
            unsafe {
                let s = CStr::from_ptr(self.message).to_string_lossy().into_owned();
                (table.free_error)(self.message);
                s
            }
        };
        if self.size == 0 {
            return Ok(());
        }
        let detailed = reply
            .map(VectorGuard::to_vec)
            .filter(|b| !b.is_empty())
            .and_then(|b| bincode::deserialize::<EngineFailure>(&b).ok());
        Err(match detailed {
            Some(f) => f.into(),
            None => DpfError::engine(message),
        })
    }
}

pub struct NativeBackend {
    id: BackendId,
    table: NativeApiTable,
    _library: Option<NativeLibrary>,
    config: ServerConfig,
    info: ServerInfo,
    version: ServerVersion,
    released: AtomicBool,
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBackend")
            .field("id", &self.id)
            .field("address", &self.info.address)
            .field("version", &self.version)
            .finish()
    }
}

impl NativeBackend {
    /// Load the library named by `config.lib_path`.
    ///
    /// # Errors
    /// `InvalidArgument` without a path; `Transport{Unavailable}` when the
    /// library or its table cannot be resolved.
    pub fn load(config: ServerConfig) -> Result<Self, DpfError> {
        let path = config.lib_path.clone().ok_or_else(|| {
            DpfError::InvalidArgument("in-process backend needs a library path".into())
        })?;
        let lib = NativeLibrary::open(&path)?;
        let table = lib.api_table()?;
        Self::init(table, Some(lib), config)
    }

    /// Wrap a table that is already resolved (statically linked engines).
    pub fn from_table(table: NativeApiTable, config: ServerConfig) -> Result<Self, DpfError> {
        Self::init(table, None, config)
    }

    fn init(table: NativeApiTable, library: Option<NativeLibrary>, config: ServerConfig) -> Result<Self, DpfError> {
        if table.abi_version != NATIVE_ABI_VERSION {
            return Err(DpfError::protocol(format!(
                "native ABI {} (expected {NATIVE_ABI_VERSION})",
                table.abi_version
            )));
        }
        let (mut major, mut minor) = (0, 0);
        // SAFETY: plain out-parameters.
        unsafe { (table.server_version)(&mut major, &mut minor) };
        let mut backend = Self {
            id: BackendId::next(),
            table,
            _library: library,
            config,
            info: ServerInfo {
                version: format!("{major}.{minor}"),
                address: String::new(),
            },
            version: ServerVersion::new(major.max(0) as u32, minor.max(0) as u32),
            released: AtomicBool::new(false),
        };
        backend.info = backend.call(Call::Base(BaseCall::ServerInfo))?.into_server_info()?;
        debug!("in-process engine {} ready", backend.version);
        Ok(backend)
    }

    fn ensure_live(&self) -> Result<(), DpfError> {
        if self.is_released() {
            Err(DpfError::NullObject)
        } else {
            Ok(())
        }
    }

    fn decode_reply(reply: &VectorGuard<'_>) -> Result<Reply, DpfError> {
        let bytes = reply.to_vec();
        bincode::deserialize::<Reply>(&bytes)?.into_result()
    }

    fn upload_raw(&self, request: &[u8], payload: &Payload) -> Result<Reply, DpfError> {
        let t = &self.table;
        let reply = VectorGuard::new(t)?;
        let mut err = ErrorSlot::new();
        let (rq, rn) = (request.as_ptr(), request.len());
        // SAFETY: every pointer is valid for the advertised length during the call.
        match payload {
            Payload::Int(v) => unsafe {
                (t.upload_int)(rq, rn, v.as_ptr(), v.len(), reply.ptr, &mut err.size, &mut err.message)
            },
            Payload::Double(v) => unsafe {
                (t.upload_double)(rq, rn, v.as_ptr(), v.len(), reply.ptr, &mut err.size, &mut err.message)
            },
            Payload::Bytes(v) => unsafe {
                (t.upload_bytes)(rq, rn, v.as_ptr(), v.len(), reply.ptr, &mut err.size, &mut err.message)
            },
            Payload::Strings(v) => {
                let owned = v
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| DpfError::InvalidArgument("string contains NUL".into()))?;
                let ptrs: Vec<*const c_char> = owned.iter().map(|c| c.as_ptr()).collect();
                unsafe {
                    (t.upload_strings)(rq, rn, ptrs.as_ptr(), ptrs.len(), reply.ptr, &mut err.size, &mut err.message)
                }
            }
        }
        err.check(t, Some(&reply))?;
        Self::decode_reply(&reply)
    }
}

unsafe extern "C" fn event_trampoline(user: *mut c_void, event: *const u8, event_size: usize) -> c_int {
    // SAFETY: `user` is the `&mut &mut dyn FnMut` passed by `listen` below,
    // live for the duration of the native call.
    let cb = unsafe { &mut *(user as *mut &mut dyn FnMut(ProgressEvent) -> bool) };
    let bytes = if event.is_null() {
        &[][..]
    } else {
        // SAFETY: the engine passes a buffer of `event_size` bytes.
        unsafe { std::slice::from_raw_parts(event, event_size) }
    };
    match bincode::deserialize::<ProgressEvent>(bytes) {
        Ok(ev) => c_int::from(cb(ev)),
        Err(_) => 0,
    }
}

impl Backend for NativeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn kind(&self) -> CommunicationProtocol {
        CommunicationProtocol::InProcess
    }

    fn address(&self) -> String {
        self.info.address.clone()
    }

    fn version(&self) -> ServerVersion {
        self.version
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn call(&self, call: Call) -> Result<Reply, DpfError> {
        self.ensure_live()?;
        let request = bincode::serialize(&call)?;
        let t = &self.table;
        let reply = VectorGuard::new(t)?;
        let mut err = ErrorSlot::new();
        // SAFETY: request and reply are valid for the call.
        unsafe {
            (t.call)(request.as_ptr(), request.len(), reply.ptr, &mut err.size, &mut err.message);
        }
        err.check(t, Some(&reply))?;
        Self::decode_reply(&reply)
    }

    fn upload(
        &self,
        call: Call,
        payload: &Payload,
        opts: &mut TransferOptions<'_>,
    ) -> Result<Reply, DpfError> {
        self.ensure_live()?;
        if opts.is_cancelled() {
            return Err(DpfError::cancelled());
        }
        let request = bincode::serialize(&call)?;
        let elems = match payload {
            Payload::Strings(v) => v.iter().map(|s| s.len() + 1).sum(),
            other => other.len(),
        };
        let mut gate = ProgressGate::new(opts.progress(), elems, self.config.progress_threshold);
        let reply = self.upload_raw(&request, payload)?;
        gate.update(elems);
        gate.finish();
        Ok(reply)
    }

    fn download(&self, call: Call, opts: &mut TransferOptions<'_>) -> Result<Payload, DpfError> {
        self.ensure_live()?;
        if opts.is_cancelled() {
            return Err(DpfError::cancelled());
        }
        let request = bincode::serialize(&call)?;
        let t = &self.table;
        let out = VectorGuard::new(t)?;
        let mut kind: c_int = -1;
        let mut count = 0usize;
        let mut err = ErrorSlot::new();
        // SAFETY: out-parameters are valid for the call.
        unsafe {
            (t.download)(
                request.as_ptr(),
                request.len(),
                out.ptr,
                &mut kind,
                &mut count,
                &mut err.size,
                &mut err.message,
            );
        }
        err.check(t, Some(&out))?;
        let kind = match kind {
            ARRAY_INT => ArrayKind::Int,
            ARRAY_DOUBLE => ArrayKind::Double,
            ARRAY_BYTES => ArrayKind::Bytes,
            ARRAY_STRINGS => ArrayKind::Strings,
            other => return Err(DpfError::protocol(format!("unknown native array kind {other}"))),
        };
        let bytes = out.to_vec();
        let elems = bytes.len() / kind.element_size();
        let mut gate = ProgressGate::new(opts.progress(), elems, self.config.progress_threshold);
        let payload = Payload::from_le_bytes(kind, &bytes, (kind == ArrayKind::Strings).then_some(count))?;
        gate.update(elems);
        gate.finish();
        Ok(payload)
    }

    fn listen(
        &self,
        session: ObjectId,
        on_event: &mut dyn FnMut(ProgressEvent) -> bool,
    ) -> Result<(), DpfError> {
        self.ensure_live()?;
        let mut cb: &mut dyn FnMut(ProgressEvent) -> bool = on_event;
        let user: *mut c_void = (&mut cb as *mut &mut dyn FnMut(ProgressEvent) -> bool).cast();
        let mut err = ErrorSlot::new();
        // SAFETY: `user` outlives the call; the trampoline matches EventCallback.
        unsafe {
            (self.table.listen)(session.0, event_trampoline, user, &mut err.size, &mut err.message);
        }
        err.check(&self.table, None)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            info!("releasing in-process engine {}", self.info.address);
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
