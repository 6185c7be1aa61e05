//! Frame channels: TCP for remote engines, in-memory queues for engines
//! living in the same process.
//!
//! Frames are encoded to contiguous byte buffers in both cases, so the
//! in-memory path exercises the same codec as the socket path.

use super::wire::{self, Frame};
use crate::dpf_error::{DpfError, TransportErrorKind};
use bytes::Bytes;
use log::{debug, trace};
use std::fmt;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Bidirectional, ordered frame pipe.
pub trait Channel: Send {
    fn send(&mut self, frame: &Frame) -> Result<(), DpfError>;

    /// Blocks for the next frame, bounded by the current timeout.
    fn recv(&mut self) -> Result<Frame, DpfError>;

    /// `None` blocks forever.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DpfError>;
}

/// Opens new channels to one engine.
pub trait Connector: Send + Sync + fmt::Debug {
    fn connect(&self) -> Result<Box<dyn Channel>, DpfError>;

    fn address(&self) -> String;
}

// --- TCP ---

pub struct TcpChannel {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    max_frame_size: usize,
}

impl TcpChannel {
    pub fn new(stream: TcpStream, max_frame_size: usize) -> Result<Self, DpfError> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            max_frame_size,
        })
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, frame: &Frame) -> Result<(), DpfError> {
        wire::write_frame(&mut self.writer, frame, self.max_frame_size)
    }

    fn recv(&mut self) -> Result<Frame, DpfError> {
        wire::read_frame(&mut self.reader, self.max_frame_size)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DpfError> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.writer.get_ref().set_write_timeout(timeout)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Option<Duration>,
    max_frame_size: usize,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, timeout: Option<Duration>, max_frame_size: usize) -> Self {
        Self {
            address: address.into(),
            timeout,
            max_frame_size,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Box<dyn Channel>, DpfError> {
        debug!("tcp connect to {}", self.address);
        let addr = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                DpfError::transport(
                    TransportErrorKind::Unavailable,
                    format!("`{}` resolves to no address", self.address),
                )
            })?;
        let stream = match self.timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t)?,
            None => TcpStream::connect(addr)?,
        };
        let mut ch = TcpChannel::new(stream, self.max_frame_size)?;
        ch.set_timeout(self.timeout)?;
        Ok(Box::new(ch))
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

// --- in-memory ---

/// One end of an in-process frame pipe.
pub struct MemoryChannel {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    timeout: Option<Duration>,
    max_frame_size: usize,
}

/// Two connected ends.
pub fn memory_pair(max_frame_size: usize) -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let a = MemoryChannel {
        tx: a_tx,
        rx: a_rx,
        timeout: None,
        max_frame_size,
    };
    let b = MemoryChannel {
        tx: b_tx,
        rx: b_rx,
        timeout: None,
        max_frame_size,
    };
    (a, b)
}

fn closed() -> DpfError {
    DpfError::transport(TransportErrorKind::Unavailable, "channel closed by peer")
}

impl Channel for MemoryChannel {
    fn send(&mut self, frame: &Frame) -> Result<(), DpfError> {
        let bytes = wire::encode(frame, self.max_frame_size)?;
        trace!("memory send tag={} len={}", frame.tag(), bytes.len());
        self.tx.send(bytes).map_err(|_| closed())
    }

    fn recv(&mut self) -> Result<Frame, DpfError> {
        let bytes = match self.timeout {
            Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => DpfError::transport(
                    TransportErrorKind::Timeout,
                    format!("no frame within {t:?}"),
                ),
                RecvTimeoutError::Disconnected => closed(),
            })?,
            None => self.rx.recv().map_err(|_| closed())?,
        };
        wire::decode(&bytes, self.max_frame_size)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DpfError> {
        self.timeout = timeout;
        Ok(())
    }
}

type Acceptor = Arc<dyn Fn(MemoryChannel) + Send + Sync>;

/// Connector handing the far end of every new pipe to an acceptor
/// (typically a serving thread spawner).
#[derive(Clone)]
pub struct MemoryConnector {
    address: String,
    timeout: Option<Duration>,
    max_frame_size: usize,
    accept: Acceptor,
}

impl MemoryConnector {
    pub fn new<F>(address: impl Into<String>, timeout: Option<Duration>, max_frame_size: usize, accept: F) -> Self
    where
        F: Fn(MemoryChannel) + Send + Sync + 'static,
    {
        Self {
            address: address.into(),
            timeout,
            max_frame_size,
            accept: Arc::new(accept),
        }
    }
}

impl fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn Channel>, DpfError> {
        let (mut client, server) = memory_pair(self.max_frame_size);
        client.set_timeout(self.timeout)?;
        (self.accept)(server);
        Ok(Box::new(client))
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pair_round_trip() {
        let (mut a, mut b) = memory_pair(1 << 20);
        a.send(&Frame::UploadEnd).unwrap();
        assert_eq!(b.recv().unwrap(), Frame::UploadEnd);
    }

    #[test]
    fn timeout_and_disconnect_map_to_transport_kinds() {
        let (mut a, b) = memory_pair(1 << 20);
        a.set_timeout(Some(Duration::from_millis(5))).unwrap();
        match a.recv() {
            Err(DpfError::Transport { kind, .. }) => assert_eq!(kind, TransportErrorKind::Timeout),
            other => panic!("unexpected {other:?}"),
        }
        drop(b);
        match a.recv() {
            Err(DpfError::Transport { kind, .. }) => assert_eq!(kind, TransportErrorKind::Unavailable),
            other => panic!("unexpected {other:?}"),
        }
    }
}
