//! Unix domain socket transport.
//!
//! Writes happen on the caller's thread with a blocking `UnixStream`. A
//! background reader thread owns a clone of the stream, decodes frames and
//! forwards them through an `mpsc` channel; it never touches viewer state.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use super::{Inbound, RequestId, Transport};
use crate::constants::READ_BUFFER_SIZE;
use crate::framing::{Frame, FrameDecoder};
use crate::packet::Packet;

/// Provider connection over a Unix stream socket.
pub struct UnixTransport {
    path: PathBuf,
    stream: Option<UnixStream>,
    rx: Option<Receiver<Inbound>>,
    /// Items received while waiting for a synchronous reply.
    stash: VecDeque<Inbound>,
    next_seq: u64,
}

impl std::fmt::Debug for UnixTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixTransport")
            .field("path", &self.path)
            .field("connected", &self.stream.is_some())
            .field("stashed", &self.stash.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl UnixTransport {
    /// Transport for the socket at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            rx: None,
            stash: VecDeque::new(),
            next_seq: 1,
        }
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            bail!("not connected to {}", self.path.display());
        };
        let bytes = frame.encode()?;
        stream.write_all(&bytes).context("write frame to provider")?;
        Ok(())
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        seq
    }
}

impl Transport for UnixTransport {
    fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path)
            .with_context(|| format!("connect to provider socket: {}", self.path.display()))?;
        let reader = stream.try_clone().context("clone provider socket")?;
        let (tx, rx) = mpsc::channel();
        spawn_reader(reader, tx)?;

        log::info!("[Transport] Connected to {}", self.path.display());
        self.stream = Some(stream);
        self.rx = Some(rx);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::info!("[Transport] Disconnected from {}", self.path.display());
        }
        self.rx = None;
        self.stash.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, packet: &Packet) -> Result<RequestId> {
        let seq = self.alloc_seq();
        self.write_frame(&Frame::Request {
            seq,
            packet: packet.clone(),
        })?;
        Ok(seq)
    }

    fn send_only(&mut self, packet: &Packet) -> Result<()> {
        self.write_frame(&Frame::Notify(packet.clone()))
    }

    fn send_sync(&mut self, packet: &Packet, timeout: Duration) -> Result<Packet> {
        let seq = self.send(packet)?;
        let deadline = Instant::now() + timeout;
        loop {
            let Some(rx) = self.rx.as_ref() else {
                bail!("not connected to {}", self.path.display());
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Inbound::Reply { id, packet }) if id == seq => return Ok(packet),
                Ok(Inbound::Disconnected) => {
                    self.stash.push_back(Inbound::Disconnected);
                    bail!("provider disconnected during '{}'", packet.command);
                }
                Ok(other) => self.stash.push_back(other),
                Err(RecvTimeoutError::Timeout) => {
                    bail!("'{}' timed out after {:?}", packet.command, timeout)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("reader thread gone during '{}'", packet.command)
                }
            }
        }
    }

    fn poll(&mut self) -> Option<Inbound> {
        if let Some(item) = self.stash.pop_front() {
            return Some(item);
        }
        let rx = self.rx.as_ref()?;
        match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                Some(Inbound::Disconnected)
            }
        }
    }
}

/// Read frames until EOF, then report the disconnect once.
fn spawn_reader(stream: UnixStream, tx: mpsc::Sender<Inbound>) -> Result<()> {
    std::thread::Builder::new()
        .name("widget-reader".to_owned())
        .spawn(move || {
            let mut decoder = FrameDecoder::new();
            let mut stream = stream;
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let frames = match decoder.feed(&buf[..n]) {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("[Transport] Decode error: {e}");
                        break;
                    }
                };
                for frame in frames {
                    let item = match frame {
                        Frame::Reply { seq, packet } => Inbound::Reply { id: seq, packet },
                        Frame::Event(packet) | Frame::Notify(packet) => Inbound::Event(packet),
                        Frame::Request { packet, .. } => {
                            log::debug!("[Transport] Ignoring provider request '{}'", packet.command);
                            continue;
                        }
                    };
                    if tx.send(item).is_err() {
                        return;
                    }
                }
            }
            let _ = tx.send(Inbound::Disconnected);
            log::debug!("[Transport] Reader thread exiting");
        })
        .context("spawn transport reader thread")?;
    Ok(())
}
