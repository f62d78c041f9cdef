//! Outbound command queue.
//!
//! Every provider request goes through a [`CommandQueue`]. Commands are
//! drained one per drain interval, in FIFO order except for urgent ones
//! which jump to the front. Acknowledged commands move to a pending table
//! once sent and complete when their reply arrives; a failed send costs one
//! unit of TTL and re-queues the command at the front until the budget is
//! spent.
//!
//! # Flow
//!
//! ```text
//! push ──► queue ──(drain tick)──► Transport::send ──► pending[RequestId]
//!            ▲                           │ Err                  │ reply
//!            └──── ttl > 0 ◄─────────────┘                      ▼
//!                  ttl == 0 ──► completion(None)        completion(Some(packet))
//! ```
//!
//! The queue itself never runs completions; it hands finished commands back
//! to the viewer, which owns the state completions need.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::instance::WidgetHandle;
use crate::packet::Packet;
use crate::transport::RequestId;
use crate::viewer::Viewer;

/// Reply continuation of an acknowledged command.
///
/// Receives the owning handle (if any) and the reply packet, or `None` when
/// the command failed to send, timed out of its TTL, or was cleared.
pub type RpcCompletion = Box<dyn FnOnce(&mut Viewer, Option<WidgetHandle>, Option<&Packet>)>;

/// A queued provider request.
pub struct Command {
    pub(crate) packet: Packet,
    pub(crate) handle: Option<WidgetHandle>,
    pub(crate) pkgname: Option<String>,
    pub(crate) ttl: u32,
    pub(crate) completion: Option<RpcCompletion>,
    acked: bool,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("command", &self.packet.command)
            .field("handle", &self.handle)
            .field("pkgname", &self.pkgname)
            .field("ttl", &self.ttl)
            .field("acked", &self.acked)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Request that expects a reply.
    pub(crate) fn acked(packet: Packet, ttl: u32, completion: RpcCompletion) -> Self {
        Self {
            packet,
            handle: None,
            pkgname: None,
            ttl,
            completion: Some(completion),
            acked: true,
        }
    }

    /// Notification without a reply.
    pub(crate) fn notify(packet: Packet) -> Self {
        Self {
            packet,
            handle: None,
            pkgname: None,
            ttl: 1,
            completion: None,
            acked: false,
        }
    }

    /// Attach the owning handle and its package, captured now.
    #[must_use]
    pub(crate) fn owned_by(mut self, handle: WidgetHandle, pkgname: &str) -> Self {
        self.handle = Some(handle);
        self.pkgname = Some(pkgname.to_owned());
        self
    }

    /// Attach only the package, for commands about a shared instance.
    #[must_use]
    pub(crate) fn for_package(mut self, pkgname: &str) -> Self {
        self.pkgname = Some(pkgname.to_owned());
        self
    }

    pub(crate) fn is_acked(&self) -> bool {
        self.acked
    }

    pub(crate) fn name(&self) -> &str {
        &self.packet.command
    }
}

/// What the drain step decided for a command whose send failed.
#[derive(Debug)]
pub(crate) enum Retry {
    /// Re-queued at the front with the remaining TTL.
    Requeued,
    /// Out of TTL; the caller must complete it with `None`.
    Exhausted(Command),
}

/// FIFO command queue with urgent prepend, drain pacing and a pending table.
#[derive(Debug)]
pub struct CommandQueue {
    queue: VecDeque<Command>,
    pending: HashMap<RequestId, Command>,
    interval: Duration,
    next_drain: Option<Instant>,
}

impl CommandQueue {
    /// Create a queue that drains one command per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            pending: HashMap::new(),
            interval,
            next_drain: None,
        }
    }

    /// Enqueue a command. Urgent commands go to the front.
    pub(crate) fn push(&mut self, command: Command, urgent: bool) {
        log::trace!("[Rpc] Queue '{}' (urgent={})", command.name(), urgent);
        if urgent {
            self.queue.push_front(command);
        } else {
            self.queue.push_back(command);
        }
    }

    /// Pop the next command if the drain timer is due.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Command> {
        if self.queue.is_empty() {
            return None;
        }
        if self.next_drain.is_some_and(|due| now < due) {
            return None;
        }
        self.next_drain = Some(now + self.interval);
        self.queue.pop_front()
    }

    /// When the next drain step may run, if anything is queued.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.queue.is_empty() {
            None
        } else {
            self.next_drain
        }
    }

    /// Spend one unit of TTL after a failed send.
    pub(crate) fn retry(&mut self, mut command: Command) -> Retry {
        command.ttl = command.ttl.saturating_sub(1);
        if command.is_acked() && command.ttl > 0 {
            log::debug!("[Rpc] Retrying '{}' ({} attempts left)", command.name(), command.ttl);
            self.queue.push_front(command);
            Retry::Requeued
        } else {
            Retry::Exhausted(command)
        }
    }

    pub(crate) fn insert_pending(&mut self, id: RequestId, command: Command) {
        self.pending.insert(id, command);
    }

    pub(crate) fn take_pending(&mut self, id: RequestId) -> Option<Command> {
        self.pending.remove(&id)
    }

    /// Remove every queued and pending command.
    pub(crate) fn clear_all(&mut self) -> Vec<Command> {
        let mut drained: Vec<Command> = self.queue.drain(..).collect();
        let mut pending: Vec<(RequestId, Command)> = self.pending.drain().collect();
        pending.sort_by_key(|(id, _)| *id);
        drained.extend(pending.into_iter().map(|(_, c)| c));
        drained
    }

    /// Remove queued commands owned by `pkgname`. Pending ones stay.
    pub(crate) fn clear_for_package(&mut self, pkgname: &str) -> Vec<Command> {
        let (removed, kept): (Vec<Command>, Vec<Command>) = self
            .queue
            .drain(..)
            .partition(|c| c.pkgname.as_deref() == Some(pkgname));
        self.queue = kept.into();
        removed
    }

    /// Queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Sent commands awaiting a reply.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Names of queued commands, front first.
    #[must_use]
    pub fn queued_names(&self) -> Vec<&str> {
        self.queue.iter().map(Command::name).collect()
    }
}
