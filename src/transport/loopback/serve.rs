//! Engine side of the framed protocol: one thread per channel.

use super::EngineCore;
use crate::codec::{self, NUM_STRINGS, Payload, StreamMetadata};
use crate::dpf_error::{DpfError, EngineFailure, ErrorCode};
use crate::transport::call::{Call, ObjectId, Reply};
use crate::transport::channel::Channel;
use crate::transport::wire::Frame;
use log::{debug, trace, warn};
use std::sync::Arc;

fn error_reply(failure: EngineFailure) -> Frame {
    Frame::Reply(Reply::Error(failure))
}

/// Answer frames from `channel` until the peer goes away.
pub(super) fn serve_channel<C: Channel>(core: &Arc<EngineCore>, mut channel: C, chunk_bytes: usize) {
    if let Err(e) = channel.set_timeout(None) {
        warn!("loopback {}: cannot clear channel timeout: {e}", core.address);
        return;
    }
    loop {
        let frame = match channel.recv() {
            Ok(f) => f,
            Err(e) => {
                trace!("loopback {}: channel done: {e}", core.address);
                return;
            }
        };
        let sent = match frame {
            Frame::Request(call) => channel.send(&Frame::Reply(core.handle(call).unwrap_or_else(Reply::Error))),
            Frame::UploadBegin { call, metadata } => {
                let reply = receive_upload(core, &mut channel, call, &metadata);
                match reply {
                    Ok(frame) => channel.send(&frame),
                    Err(e) => Err(e),
                }
            }
            Frame::Download(call) => send_download(core, &mut channel, call, chunk_bytes),
            Frame::Listen { session } => send_events(core, &mut channel, session),
            other => channel.send(&error_reply(EngineFailure::invalid(format!(
                "unexpected frame {} outside a request",
                other.tag()
            )))),
        };
        if let Err(e) = sent {
            debug!("loopback {}: send failed, closing channel: {e}", core.address);
            return;
        }
    }
}

/// Collect chunks up to `UploadEnd` (or `Abort`) and answer the upload.
fn receive_upload<C: Channel>(
    core: &EngineCore,
    channel: &mut C,
    call: Call,
    metadata: &StreamMetadata,
) -> Result<Frame, DpfError> {
    let mut buf = Vec::with_capacity(metadata.total_bytes().unwrap_or(0));
    loop {
        match channel.recv()? {
            Frame::UploadChunk { call: header, bytes, .. } => {
                if header != call {
                    return Ok(error_reply(EngineFailure::invalid("upload chunk belongs to another call")));
                }
                buf.extend_from_slice(&bytes);
            }
            Frame::UploadEnd => break,
            Frame::Abort { reason } => {
                debug!("loopback {}: upload {} aborted: {reason}", core.address, call.service());
                return Ok(error_reply(EngineFailure::new(ErrorCode::Cancelled, reason)));
            }
            other => {
                return Ok(error_reply(EngineFailure::invalid(format!(
                    "unexpected frame {} inside an upload",
                    other.tag()
                ))));
            }
        }
    }
    let decoded = metadata
        .array_kind()
        .and_then(|kind| Payload::from_le_bytes(kind, &buf, metadata.get(NUM_STRINGS)));
    let payload = match decoded {
        Ok(p) => p,
        Err(e) => return Ok(error_reply(EngineFailure::invalid(format!("malformed upload: {e}")))),
    };
    Ok(Frame::Reply(core.handle_upload(call, payload).unwrap_or_else(Reply::Error)))
}

fn send_download<C: Channel>(core: &EngineCore, channel: &mut C, call: Call, chunk_bytes: usize) -> Result<(), DpfError> {
    let payload = match core.handle_download(call) {
        Ok(p) => p,
        Err(failure) => return channel.send(&error_reply(failure)),
    };
    let bytes = payload.to_le_bytes();
    let chunk = codec::aligned_chunk_size(payload.kind(), chunk_bytes);
    channel.send(&Frame::StreamBegin {
        metadata: StreamMetadata::for_payload(&payload),
    })?;
    for (info, part) in codec::chunks(&bytes, chunk) {
        channel.send(&Frame::StreamChunk {
            info,
            bytes: part.to_vec(),
        })?;
    }
    channel.send(&Frame::StreamEnd)
}

fn send_events<C: Channel>(core: &EngineCore, channel: &mut C, session: ObjectId) -> Result<(), DpfError> {
    let mut failed = None;
    let res = core.listen(session, &mut |ev| match channel.send(&Frame::Event(ev)) {
        Ok(()) => true,
        Err(e) => {
            failed = Some(e);
            false
        }
    });
    if let Some(e) = failed {
        return Err(e);
    }
    match res {
        Ok(()) => channel.send(&Frame::ListenEnd),
        Err(failure) => channel.send(&error_reply(failure)),
    }
}
