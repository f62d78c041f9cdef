//! Transport seam between the viewer and the provider.
//!
//! The viewer never touches sockets directly. It hands packets to a
//! [`Transport`] and polls it for replies and push events from its tick.
//! [`UnixTransport`] is the bundled implementation; tests plug in scripted
//! ones.

mod unix;

use std::time::Duration;

use anyhow::Result;

use crate::packet::Packet;

pub use unix::UnixTransport;

/// Correlation id assigned by the transport to an acknowledged send.
pub type RequestId = u64;

/// Something the provider sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to the request that was assigned `id`.
    Reply {
        /// Request the reply belongs to.
        id: RequestId,
        /// Reply payload.
        packet: Packet,
    },
    /// Unsolicited push command.
    Event(Packet),
    /// The connection went away.
    Disconnected,
}

/// Byte-level channel to the provider.
pub trait Transport {
    /// Open the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached.
    fn connect(&mut self) -> Result<()>;

    /// Close the channel. Idempotent.
    fn disconnect(&mut self);

    /// Whether the channel is open.
    fn is_connected(&self) -> bool;

    /// Send a request that expects one reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet could not be written.
    fn send(&mut self, packet: &Packet) -> Result<RequestId>;

    /// Send a notification without reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet could not be written.
    fn send_only(&mut self, packet: &Packet) -> Result<()>;

    /// Send a request and block until its reply arrives or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns an error on write failure, disconnect or timeout.
    fn send_sync(&mut self, packet: &Packet, timeout: Duration) -> Result<Packet>;

    /// Next inbound item, without blocking.
    fn poll(&mut self) -> Option<Inbound>;
}
