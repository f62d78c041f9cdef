//! Instance model: shared provider instances and per-subscriber handles.
//!
//! The provider renders one instance per distinct (package, content,
//! cluster, category, size). Every `add` call produces its own handle, and
//! several handles may observe the same shared [`Common`] record.
//!
//! # Ownership
//!
//! ```text
//! InstanceStore
//!   ├── commons: Arena<Common>   (owns framebuffers, lists attached handles)
//!   └── handles: Arena<Handle>   (owns callbacks and script operators,
//!                                 links to its Common by CommonId)
//! ```
//!
//! Neither side holds a pointer to the other; links are generation-checked
//! ids, so a completion firing after its handle was freed sees `None`.

mod arena;
mod store;

use std::any::Any;

use crate::desc::ScriptOperators;
use crate::error::{Result, ViewerError};
use crate::fb::Framebuffer;
use crate::protocol::{DeleteType, Surface};
use crate::service::SizeType;
use crate::viewer::Viewer;

use arena::SlotId;
pub(crate) use store::{CommonSeed, InstanceStore};

/// Public id of a handle.
///
/// Ids are cheap to copy and compare. An id whose handle was destroyed
/// stops resolving; every API call on it returns
/// [`ViewerError::InvalidParameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetHandle(SlotId);

impl WidgetHandle {
    /// A handle that never resolves to an instance.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self(SlotId {
            index: u32::MAX,
            generation: u32::MAX,
        })
    }
}

/// Internal id of a shared instance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CommonId(SlotId);

/// Completion closure for per-instance asynchronous operations.
///
/// Receives the provider status on success (`0` for most operations, the
/// pixmap id for pixmap acquisition, the access/key status for those
/// events).
pub type Completion = Box<dyn FnOnce(&mut Viewer, WidgetHandle, Result<i32>)>;

/// Lifecycle state of handles and shared records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Alive (possibly still waiting for the provider to confirm).
    Create,
    /// A delete was requested and is waiting for confirmation.
    Delete,
    /// Gone; only lingering references keep the slot.
    Destroyed,
}

/// Per-handle visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Visible; updates are delivered.
    Show,
    /// Hidden; the provider keeps updating.
    Hide,
    /// Hidden and paused; updates are counted, not delivered.
    HideWithPause,
}

impl Visibility {
    /// Wire value.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Show => 0,
            Self::Hide => 1,
            Self::HideWithPause => 2,
        }
    }
}

/// How the provider delivers a surface's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentType {
    /// Image file rewritten by the provider.
    #[default]
    File,
    /// Shared memory buffer.
    Buffer,
    /// Descriptor file replayed through script operators.
    Text,
    /// Window-system pixmap.
    Pixmap,
    /// Drawn by the host's own toolkit from content strings.
    Toolkit,
}

impl ContentType {
    /// Decode a wire value; unknown values fall back to [`ContentType::File`].
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Buffer,
            2 => Self::Text,
            3 => Self::Pixmap,
            4 => Self::Toolkit,
            _ => Self::File,
        }
    }
}

/// Kinds of tracked asynchronous operations.
///
/// At most one request per kind may be outstanding on a shared instance,
/// and each handle holds at most one completion per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Instance creation.
    Created,
    /// Instance deletion.
    Deleted,
    /// Pin-up change.
    Pinup,
    /// Cluster/category change.
    GroupChanged,
    /// Update period change.
    PeriodChanged,
    /// Resize.
    SizeChanged,
    /// Secondary surface creation.
    GbarCreated,
    /// Secondary surface destruction.
    GbarDestroyed,
    /// Active/passive update mode change.
    UpdateMode,
    /// Accessibility event.
    AccessEvent,
    /// Key event.
    KeyEvent,
}

impl Op {
    /// Number of operation kinds.
    pub const COUNT: usize = 11;

    /// Every operation kind.
    pub const ALL: [Op; Op::COUNT] = [
        Op::Created,
        Op::Deleted,
        Op::Pinup,
        Op::GroupChanged,
        Op::PeriodChanged,
        Op::SizeChanged,
        Op::GbarCreated,
        Op::GbarDestroyed,
        Op::UpdateMode,
        Op::AccessEvent,
        Op::KeyEvent,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Outstanding-request bits of a shared instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestFlags(u16);

impl RequestFlags {
    /// Whether a request of this kind is outstanding.
    #[must_use]
    pub fn contains(self, op: Op) -> bool {
        self.0 & (1 << op.index()) != 0
    }

    /// Claim the flag; [`ViewerError::Busy`] if already set.
    pub fn claim(&mut self, op: Op) -> Result<()> {
        if self.contains(op) {
            return Err(ViewerError::Busy);
        }
        self.0 |= 1 << op.index();
        Ok(())
    }

    /// Clear the flag. Returns whether it was set.
    pub fn release(&mut self, op: Op) -> bool {
        let was = self.contains(op);
        self.0 &= !(1 << op.index());
        was
    }
}

/// Per-surface state of a shared instance.
#[derive(Debug, Default)]
pub(crate) struct SurfaceState {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) content_type: ContentType,
    pub(crate) fb: Option<Framebuffer>,
    pub(crate) extra_buffers: Vec<(i32, i64)>,
}

impl SurfaceState {
    /// Replace the framebuffer binding (destroy old, then create new).
    pub(crate) fn rebind(&mut self, id: &str) -> Result<()> {
        if let Some(old) = self.fb.take() {
            old.destroy();
        }
        if id.is_empty() {
            return Ok(());
        }
        self.fb = Some(Framebuffer::create(id, self.width, self.height)?);
        Ok(())
    }
}

/// Shared record for one provider-side instance.
pub(crate) struct Common {
    pub(crate) pkgname: String,
    pub(crate) id: Option<String>,
    pub(crate) timestamp: f64,
    pub(crate) cluster: String,
    pub(crate) category: String,
    pub(crate) content: String,
    pub(crate) title: String,
    pub(crate) icon: String,
    pub(crate) name: String,
    pub(crate) period: f64,
    pub(crate) priority: f64,
    pub(crate) size_type: Option<SizeType>,
    pub(crate) main: SurfaceState,
    pub(crate) secondary: SurfaceState,
    pub(crate) gbar_created: bool,
    pub(crate) state: InstanceState,
    /// Delete to re-issue once a cancelled creation is confirmed.
    pub(crate) delete_type: DeleteType,
    pub(crate) is_user: bool,
    pub(crate) pinup_supported: bool,
    pub(crate) is_pinned_up: bool,
    pub(crate) is_active_update: bool,
    pub(crate) request: RequestFlags,
    pub(crate) visible: Visibility,
    pub(crate) handles: Vec<WidgetHandle>,
    pub(crate) refcnt: usize,
}

impl std::fmt::Debug for Common {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Common")
            .field("pkgname", &self.pkgname)
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("state", &self.state)
            .field("refcnt", &self.refcnt)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl Common {
    pub(crate) fn surface(&self, surface: Surface) -> &SurfaceState {
        match surface {
            Surface::Main => &self.main,
            Surface::Secondary => &self.secondary,
        }
    }

    pub(crate) fn surface_mut(&mut self, surface: Surface) -> &mut SurfaceState {
        match surface {
            Surface::Main => &mut self.main,
            Surface::Secondary => &mut self.secondary,
        }
    }

    /// Whether the provider confirmed this instance.
    pub(crate) fn is_created(&self) -> bool {
        self.id.is_some()
    }

    /// Confirmed id and package name, or `Fault` while unconfirmed.
    pub(crate) fn target(&self) -> Result<(String, String)> {
        match &self.id {
            Some(id) => Ok((self.pkgname.clone(), id.clone())),
            None => Err(ViewerError::Fault),
        }
    }

    /// Whether this record can serve an add with the given key.
    pub(crate) fn matches(&self, key: &ShareKey<'_>) -> bool {
        self.state == InstanceState::Create
            && self.is_created()
            && !self.request.contains(Op::SizeChanged)
            && self.pkgname == key.pkgname
            && self.content == key.content
            && self.cluster == key.cluster
            && self.category == key.category
            && self.main.width == key.width
            && self.main.height == key.height
    }
}

/// Sharing key of an add request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShareKey<'a> {
    pub(crate) pkgname: &'a str,
    pub(crate) content: &'a str,
    pub(crate) cluster: &'a str,
    pub(crate) category: &'a str,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// One subscriber's view of a shared instance.
pub(crate) struct Handle {
    pub(crate) state: InstanceState,
    pub(crate) refcnt: usize,
    pub(crate) visible: Visibility,
    pub(crate) paused_updating: u32,
    pub(crate) common: Option<CommonId>,
    pub(crate) is_user: bool,
    /// Moved to a fresh common by a resize; cleared on `created`.
    pub(crate) relinking: bool,
    pub(crate) callbacks: [Option<Completion>; Op::COUNT],
    pub(crate) ops: [Option<Box<dyn ScriptOperators>>; 2],
    pub(crate) data: Option<Box<dyn Any>>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("state", &self.state)
            .field("refcnt", &self.refcnt)
            .field("visible", &self.visible)
            .field("paused_updating", &self.paused_updating)
            .field("common", &self.common)
            .field("is_user", &self.is_user)
            .finish_non_exhaustive()
    }
}

impl Handle {
    pub(crate) fn new(is_user: bool) -> Self {
        Self {
            state: InstanceState::Create,
            refcnt: 1,
            visible: Visibility::Show,
            paused_updating: 0,
            common: None,
            is_user,
            relinking: false,
            callbacks: Default::default(),
            ops: [None, None],
            data: None,
        }
    }

    /// Store a completion, returning the one it supersedes.
    pub(crate) fn set_callback(&mut self, op: Op, cb: Completion) -> Option<Completion> {
        self.callbacks[op.index()].replace(cb)
    }

    /// Take (and clear) the completion for `op`.
    pub(crate) fn take_callback(&mut self, op: Op) -> Option<Completion> {
        self.callbacks[op.index()].take()
    }

    pub(crate) fn has_callback(&self, op: Op) -> bool {
        self.callbacks[op.index()].is_some()
    }

    pub(crate) fn ops_slot(&mut self, surface: Surface) -> &mut Option<Box<dyn ScriptOperators>> {
        match surface {
            Surface::Main => &mut self.ops[0],
            Surface::Secondary => &mut self.ops[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flags_single_outstanding() {
        let mut flags = RequestFlags::default();
        assert!(flags.claim(Op::PeriodChanged).is_ok());
        assert_eq!(flags.claim(Op::PeriodChanged), Err(ViewerError::Busy));
        assert!(flags.claim(Op::GroupChanged).is_ok());
        assert!(flags.release(Op::PeriodChanged));
        assert!(!flags.release(Op::PeriodChanged));
        assert!(flags.contains(Op::GroupChanged));
        assert!(flags.claim(Op::PeriodChanged).is_ok());
    }

    #[test]
    fn test_every_op_has_its_own_bit() {
        let ops = Op::ALL;
        let mut flags = RequestFlags::default();
        for op in ops {
            flags.claim(op).unwrap();
        }
        for op in ops {
            assert_eq!(flags.claim(op), Err(ViewerError::Busy));
        }
    }

    #[test]
    fn test_content_type_codes() {
        assert_eq!(ContentType::from_code(2), ContentType::Text);
        assert_eq!(ContentType::from_code(99), ContentType::File);
    }
}
