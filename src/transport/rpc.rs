//! Message-based RPC backend.
//!
//! Each logical call leases one channel from a small pool, so calls issued
//! from different threads never interleave frames. A channel that saw a
//! transport error, or that was abandoned mid-stream, is dropped instead of
//! being returned to the pool.

use super::call::{BaseCall, Call, ObjectId, Reply, ServerInfo};
use super::channel::{Channel, Connector, TcpConnector};
use super::wire::Frame;
use super::{Backend, BackendId, ServerVersion, TransferOptions};
use crate::codec::{self, Assembler, Payload, ProgressGate, StreamMetadata};
use crate::config::{CommunicationProtocol, ServerConfig};
use crate::dpf_error::DpfError;
use crate::session::ProgressEvent;
use log::{debug, info, trace};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct RpcBackend {
    id: BackendId,
    connector: Box<dyn Connector>,
    config: ServerConfig,
    info: ServerInfo,
    version: ServerVersion,
    pool: Mutex<Vec<Box<dyn Channel>>>,
    released: AtomicBool,
}

impl fmt::Debug for RpcBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcBackend")
            .field("id", &self.id)
            .field("connector", &self.connector)
            .field("version", &self.version)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Channel borrowed from the pool for one call.
struct Lease<'b> {
    backend: &'b RpcBackend,
    channel: Option<Box<dyn Channel>>,
}

impl Lease<'_> {
    fn channel(&mut self) -> Result<&mut Box<dyn Channel>, DpfError> {
        self.channel
            .as_mut()
            .ok_or_else(|| DpfError::protocol("channel already discarded"))
    }

    fn send(&mut self, frame: &Frame) -> Result<(), DpfError> {
        let res = self.channel()?.send(frame);
        if res.is_err() {
            self.discard();
        }
        res
    }

    fn recv(&mut self) -> Result<Frame, DpfError> {
        let res = self.channel()?.recv();
        if res.is_err() {
            self.discard();
        }
        res
    }

    /// Never return this channel to the pool.
    fn discard(&mut self) {
        self.channel = None;
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(ch) = self.channel.take() {
            if !self.backend.is_released() {
                self.backend.pool.lock().push(ch);
            }
        }
    }
}

fn unexpected(frame: &Frame, during: &str) -> DpfError {
    DpfError::protocol(format!("unexpected frame (tag {}) during {during}", frame.tag()))
}

impl RpcBackend {
    /// Open a first channel and run the `ServerInfo` handshake.
    pub fn connect(connector: Box<dyn Connector>, config: ServerConfig) -> Result<Self, DpfError> {
        debug!("rpc connect to {}", connector.address());
        let mut channel = connector.connect()?;
        channel.send(&Frame::Request(Call::Base(BaseCall::ServerInfo)))?;
        let info = match channel.recv()? {
            Frame::Reply(r) => r.into_server_info()?,
            other => return Err(unexpected(&other, "handshake")),
        };
        let version = info.version.parse()?;
        debug!("connected to engine {} at {}", version, info.address);
        Ok(Self {
            id: BackendId::next(),
            connector,
            config,
            info,
            version,
            pool: Mutex::new(vec![channel]),
            released: AtomicBool::new(false),
        })
    }

    /// TCP connection to `config.ip:config.port`.
    pub fn connect_tcp(config: ServerConfig) -> Result<Self, DpfError> {
        let connector = TcpConnector::new(config.address(), config.timeout, config.max_frame_size);
        Self::connect(Box::new(connector), config)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn lease(&self) -> Result<Lease<'_>, DpfError> {
        if self.is_released() {
            return Err(DpfError::NullObject);
        }
        let pooled = self.pool.lock().pop();
        let channel = match pooled {
            Some(ch) => ch,
            None => self.connector.connect()?,
        };
        Ok(Lease {
            backend: self,
            channel: Some(channel),
        })
    }

    fn expect_reply(lease: &mut Lease<'_>, during: &str) -> Result<Reply, DpfError> {
        match lease.recv()? {
            Frame::Reply(r) => r.into_result(),
            other => {
                lease.discard();
                Err(unexpected(&other, during))
            }
        }
    }
}

impl Backend for RpcBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn kind(&self) -> CommunicationProtocol {
        CommunicationProtocol::Rpc
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
        trace!("rpc call {}", call.service());
        let mut lease = self.lease()?;
        lease.send(&Frame::Request(call))?;
        Self::expect_reply(&mut lease, "call")
    }

    fn upload(
        &self,
        call: Call,
        payload: &Payload,
        opts: &mut TransferOptions<'_>,
    ) -> Result<Reply, DpfError> {
        let metadata = StreamMetadata::for_payload(payload);
        let bytes = payload.to_le_bytes();
        let chunk = codec::aligned_chunk_size(payload.kind(), self.config.streaming_buffer_size);
        let elem = payload.kind().element_size();
        debug!(
            "upload {} of {} bytes in {} chunks",
            call.service(),
            bytes.len(),
            codec::chunk_count(bytes.len(), chunk)
        );
        let mut lease = self.lease()?;
        lease.send(&Frame::UploadBegin {
            call: call.clone(),
            metadata,
        })?;
        let cancel = opts.cancel.clone();
        let mut gate = ProgressGate::new(opts.progress(), bytes.len() / elem, self.config.progress_threshold);
        for (info, part) in codec::chunks(&bytes, chunk) {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                debug!("upload cancelled after {} bytes", info.offset);
                lease.send(&Frame::Abort {
                    reason: "cancelled by caller".into(),
                })?;
                return match Self::expect_reply(&mut lease, "abort") {
                    Ok(_) => Err(DpfError::cancelled()),
                    Err(e) => Err(e),
                };
            }
            trace!("upload chunk {} ({} bytes)", info.index, info.len);
            lease.send(&Frame::UploadChunk {
                call: call.clone(),
                info,
                bytes: part.to_vec(),
            })?;
            gate.update((info.offset as usize + part.len()) / elem);
        }
        lease.send(&Frame::UploadEnd)?;
        let reply = Self::expect_reply(&mut lease, "upload")?;
        gate.finish();
        Ok(reply)
    }

    fn download(&self, call: Call, opts: &mut TransferOptions<'_>) -> Result<Payload, DpfError> {
        let service = call.service();
        let mut lease = self.lease()?;
        lease.send(&Frame::Download(call))?;
        let metadata = match lease.recv()? {
            Frame::StreamBegin { metadata } => metadata,
            Frame::Reply(r) => {
                r.into_result()?;
                lease.discard();
                return Err(DpfError::protocol("download answered without a stream"));
            }
            other => {
                lease.discard();
                return Err(unexpected(&other, "download"));
            }
        };
        debug!("download {} of {:?} bytes", service, metadata.total_bytes().ok());
        let cancel = opts.cancel.clone();
        let mut asm = Assembler::new(&metadata, self.config.progress_threshold, opts.progress())?;
        loop {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                // the rest of the stream is still in flight on this channel
                lease.discard();
                return Err(DpfError::cancelled());
            }
            match lease.recv()? {
                Frame::StreamChunk { info, bytes } => {
                    trace!("download chunk {} ({} bytes)", info.index, info.len);
                    if let Err(e) = asm.push(&bytes) {
                        lease.discard();
                        return Err(e);
                    }
                }
                Frame::StreamEnd => break,
                other => {
                    lease.discard();
                    return Err(unexpected(&other, "download stream"));
                }
            }
        }
        asm.finish()
    }

    fn listen(
        &self,
        session: ObjectId,
        on_event: &mut dyn FnMut(ProgressEvent) -> bool,
    ) -> Result<(), DpfError> {
        let mut lease = self.lease()?;
        lease.channel()?.set_timeout(None)?;
        lease.send(&Frame::Listen { session })?;
        loop {
            match lease.recv()? {
                Frame::Event(ev) => {
                    if !on_event(ev) {
                        lease.discard();
                        return Ok(());
                    }
                }
                Frame::ListenEnd => break,
                Frame::Reply(r) => {
                    lease.discard();
                    return r.into_result().map(|_| ());
                }
                other => {
                    lease.discard();
                    return Err(unexpected(&other, "listen"));
                }
            }
        }
        let timeout = self.config.timeout;
        lease.channel()?.set_timeout(timeout)?;
        Ok(())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            info!("releasing rpc connection to {}", self.info.address);
            self.pool.lock().clear();
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
