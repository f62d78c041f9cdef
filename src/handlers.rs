//! Process-wide event and fault handler lists.
//!
//! Handlers are registered with [`crate::Viewer::add_event_handler`] and
//! [`crate::Viewer::add_fault_handler`], which hand back a [`HandlerToken`]
//! used for removal. Closures have no identity, so the token is the only
//! removal key.
//!
//! Removal while a dispatch is running only marks the entry. Marked entries
//! are skipped by the running dispatch and swept after the outermost
//! dispatch returns, so no handler is skipped or called twice because the
//! list shifted underneath the iteration.

use crate::error::ViewerError;
use crate::instance::WidgetHandle;
use crate::protocol::Surface;
use crate::viewer::Viewer;

/// Opaque registration token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

/// Instance event delivered to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// An instance became available.
    Created,
    /// An instance went away.
    Deleted,
    /// New content on a surface.
    Updated(Surface),
    /// A multi-frame update started.
    UpdateBegin(Surface),
    /// A multi-frame update finished.
    UpdateEnd(Surface),
    /// A surface was resized.
    SizeChanged(Surface),
    /// Cluster/category changed.
    GroupChanged,
    /// Pin-up state changed.
    PinupChanged,
    /// Update period changed.
    PeriodChanged,
    /// Active/passive update mode changed.
    UpdateModeChanged,
    /// Secondary surface created.
    GbarCreated,
    /// Secondary surface destroyed.
    GbarDestroyed,
    /// The provider asks the host to close the secondary surface.
    RequestCloseGbar,
    /// Content, title, icon or name metadata changed.
    ExtraInfoUpdated,
    /// An extra buffer was attached.
    ExtraBufferCreated {
        /// Surface carrying the buffer.
        surface: Surface,
        /// Buffer slot.
        index: i32,
    },
    /// An extra buffer was detached.
    ExtraBufferDestroyed {
        /// Surface carrying the buffer.
        surface: Surface,
        /// Buffer slot.
        index: i32,
    },
    /// An extra buffer has new content.
    ExtraBufferUpdated {
        /// Surface carrying the buffer.
        surface: Surface,
        /// Buffer slot.
        index: i32,
    },
}

/// Session-level fault delivered to fault handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The connection to the provider was lost.
    ProviderDisconnected,
    /// The provider rejected the session handshake.
    HandshakeRejected(ViewerError),
    /// A provider package crashed or was deactivated.
    Deactivated {
        /// Package that faulted.
        pkgname: String,
        /// Source file reported by the provider.
        file: String,
        /// Function reported by the provider.
        func: String,
    },
}

/// Event handler closure.
pub type EventHandler = Box<dyn FnMut(&mut Viewer, WidgetHandle, Event)>;

/// Fault handler closure.
pub type FaultHandler = Box<dyn FnMut(&mut Viewer, &Fault)>;

struct Entry<F> {
    token: HandlerToken,
    callback: Option<F>,
    removed: bool,
}

/// Ordered handler list with deferred removal.
///
/// Dispatch protocol: [`begin`](Self::begin), then [`take`](Self::take) and
/// [`restore`](Self::restore) each index below the length observed at
/// `begin`, then [`end`](Self::end).
pub(crate) struct HandlerList<F> {
    entries: Vec<Entry<F>>,
    next_token: u64,
    depth: usize,
}

impl<F> Default for HandlerList<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 0,
            depth: 0,
        }
    }
}

impl<F> std::fmt::Debug for HandlerList<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerList")
            .field("len", &self.len())
            .field("depth", &self.depth)
            .field("next_token", &self.next_token)
            .finish()
    }
}

impl<F> HandlerList<F> {
    pub(crate) fn add(&mut self, callback: F) -> HandlerToken {
        let token = HandlerToken(self.next_token);
        self.next_token += 1;
        self.entries.push(Entry {
            token,
            callback: Some(callback),
            removed: false,
        });
        token
    }

    /// Remove by token. Returns whether a live entry was found.
    pub(crate) fn remove(&mut self, token: HandlerToken) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.token == token && !e.removed)
        else {
            return false;
        };
        if self.depth > 0 {
            self.entries[pos].removed = true;
        } else {
            self.entries.remove(pos);
        }
        true
    }

    /// Live entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    /// Start a dispatch. Returns the number of slots to visit.
    pub(crate) fn begin(&mut self) -> usize {
        self.depth += 1;
        self.entries.len()
    }

    /// Borrow the callback at `idx` for one call. `None` if it was removed
    /// or is already running further up the stack.
    pub(crate) fn take(&mut self, idx: usize) -> Option<F> {
        let entry = self.entries.get_mut(idx)?;
        if entry.removed {
            return None;
        }
        entry.callback.take()
    }

    pub(crate) fn restore(&mut self, idx: usize, callback: F) {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.callback = Some(callback);
        }
    }

    /// Finish a dispatch; the outermost one sweeps removed entries.
    pub(crate) fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.entries.retain(|e| !e.removed);
        }
    }
}
