//! Arena-backed storage for commons and handles.
//!
//! The store only maintains links and counts. Decisions about when a
//! common goes away or which completion fires live in the viewer.

use super::arena::Arena;
use super::{
    Common, CommonId, Handle, InstanceState, ShareKey, SurfaceState, Visibility, WidgetHandle,
};
use crate::constants::DEFAULT_PERIOD;
use crate::protocol::DeleteType;

/// Every common and handle known to a session.
#[derive(Debug, Default)]
pub(crate) struct InstanceStore {
    commons: Arena<Common>,
    handles: Arena<Handle>,
}

/// Client-chosen attributes of a common created by `add` or a relink.
#[derive(Debug, Clone)]
pub(crate) struct CommonSeed {
    pub(crate) pkgname: String,
    pub(crate) content: String,
    pub(crate) cluster: String,
    pub(crate) category: String,
    pub(crate) period: f64,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) timestamp: f64,
}

impl InstanceStore {
    // ── Commons ─────────────────────────────────────────────────────────────

    pub(crate) fn create_common(&mut self, seed: CommonSeed) -> CommonId {
        let common = Common {
            pkgname: seed.pkgname,
            id: None,
            timestamp: seed.timestamp,
            cluster: seed.cluster,
            category: seed.category,
            content: seed.content,
            title: String::new(),
            icon: String::new(),
            name: String::new(),
            period: seed.period,
            priority: 0.0,
            size_type: crate::service::SizeType::from_pixels(seed.width, seed.height),
            main: SurfaceState {
                width: seed.width,
                height: seed.height,
                ..SurfaceState::default()
            },
            secondary: SurfaceState::default(),
            gbar_created: false,
            state: InstanceState::Create,
            delete_type: DeleteType::default(),
            is_user: true,
            pinup_supported: false,
            is_pinned_up: false,
            is_active_update: false,
            request: super::RequestFlags::default(),
            visible: Visibility::Show,
            handles: Vec::new(),
            refcnt: 0,
        };
        CommonId(self.commons.insert(common))
    }

    /// A common announced by the provider without a local add.
    pub(crate) fn create_remote_common(&mut self, pkgname: &str, id: &str, timestamp: f64) -> CommonId {
        let cid = self.create_common(CommonSeed {
            pkgname: pkgname.to_owned(),
            content: String::new(),
            cluster: String::new(),
            category: String::new(),
            period: DEFAULT_PERIOD,
            width: 0,
            height: 0,
            timestamp,
        });
        if let Some(common) = self.common_mut(cid) {
            common.id = Some(id.to_owned());
            common.is_user = false;
        }
        cid
    }

    pub(crate) fn common(&self, cid: CommonId) -> Option<&Common> {
        self.commons.get(cid.0)
    }

    pub(crate) fn common_mut(&mut self, cid: CommonId) -> Option<&mut Common> {
        self.commons.get_mut(cid.0)
    }

    /// Remove a common and release its framebuffers.
    pub(crate) fn destroy_common(&mut self, cid: CommonId) {
        let Some(mut common) = self.commons.remove(cid.0) else {
            return;
        };
        if common.refcnt > 0 {
            log::warn!(
                "[Instance] Destroying {} with {} attached handles",
                common.pkgname,
                common.refcnt
            );
        }
        for surface in [&mut common.main, &mut common.secondary] {
            if let Some(fb) = surface.fb.take() {
                fb.destroy();
            }
        }
        log::debug!("[Instance] Common {} ({:?}) destroyed", common.pkgname, common.id);
    }

    pub(crate) fn find_by_id(&self, pkgname: &str, id: &str) -> Option<CommonId> {
        self.commons
            .iter()
            .find(|(_, c)| c.pkgname == pkgname && c.id.as_deref() == Some(id))
            .map(|(slot, _)| CommonId(slot))
    }

    /// Unconfirmed common whose `new` request carried `timestamp`.
    pub(crate) fn find_by_timestamp(&self, timestamp: f64) -> Option<CommonId> {
        self.commons
            .iter()
            .find(|(_, c)| c.id.is_none() && c.timestamp.to_bits() == timestamp.to_bits())
            .map(|(slot, _)| CommonId(slot))
    }

    pub(crate) fn find_sharable(&self, key: &ShareKey<'_>) -> Option<CommonId> {
        self.commons
            .iter()
            .find(|(_, c)| c.matches(key))
            .map(|(slot, _)| CommonId(slot))
    }

    pub(crate) fn common_ids(&self) -> Vec<CommonId> {
        self.commons.ids().into_iter().map(CommonId).collect()
    }

    pub(crate) fn common_count(&self) -> usize {
        self.commons.len()
    }

    // ── Handles ─────────────────────────────────────────────────────────────

    pub(crate) fn create_handle(&mut self, is_user: bool) -> WidgetHandle {
        WidgetHandle(self.handles.insert(Handle::new(is_user)))
    }

    pub(crate) fn handle(&self, h: WidgetHandle) -> Option<&Handle> {
        self.handles.get(h.0)
    }

    pub(crate) fn handle_mut(&mut self, h: WidgetHandle) -> Option<&mut Handle> {
        self.handles.get_mut(h.0)
    }

    /// Handle in `Create` state, or `None`.
    pub(crate) fn live(&self, h: WidgetHandle) -> Option<&Handle> {
        self.handle(h).filter(|handle| handle.state == InstanceState::Create)
    }

    /// Live handle together with its common.
    pub(crate) fn resolve(&self, h: WidgetHandle) -> Option<(&Handle, &Common)> {
        let handle = self.handle(h).filter(|handle| handle.state != InstanceState::Destroyed)?;
        let common = self.common(handle.common?)?;
        Some((handle, common))
    }

    pub(crate) fn ref_handle(&mut self, h: WidgetHandle) {
        if let Some(handle) = self.handle_mut(h) {
            handle.refcnt += 1;
        }
    }

    /// Drop one reference. The slot is freed at zero; returns whether it was.
    pub(crate) fn unref_handle(&mut self, h: WidgetHandle) -> bool {
        let Some(handle) = self.handle_mut(h) else {
            return false;
        };
        handle.refcnt = handle.refcnt.saturating_sub(1);
        if handle.refcnt > 0 {
            return false;
        }
        if let Some(cid) = handle.common {
            log::warn!("[Instance] Freeing {:?} still attached to {:?}", h, cid);
            self.detach(h);
        }
        self.handles.remove(h.0);
        true
    }

    pub(crate) fn live_handles(&self) -> Vec<WidgetHandle> {
        self.handles
            .iter()
            .filter(|(_, h)| h.state != InstanceState::Destroyed)
            .map(|(slot, _)| WidgetHandle(slot))
            .collect()
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.len()
    }

    // ── Links ───────────────────────────────────────────────────────────────

    pub(crate) fn attach(&mut self, h: WidgetHandle, cid: CommonId) {
        let Some(common) = self.commons.get_mut(cid.0) else {
            return;
        };
        common.handles.push(h);
        common.refcnt += 1;
        if let Some(handle) = self.handles.get_mut(h.0) {
            handle.common = Some(cid);
        }
    }

    /// Unlink a handle. Returns the common it was attached to.
    pub(crate) fn detach(&mut self, h: WidgetHandle) -> Option<CommonId> {
        let cid = self.handles.get_mut(h.0)?.common.take()?;
        if let Some(common) = self.commons.get_mut(cid.0) {
            common.handles.retain(|&other| other != h);
            common.refcnt = common.handles.len();
        }
        Some(cid)
    }

    pub(crate) fn handles_of(&self, cid: CommonId) -> Vec<WidgetHandle> {
        self.common(cid).map(|c| c.handles.clone()).unwrap_or_default()
    }

    /// Show if any attached handle shows, else Hide if any hides.
    pub(crate) fn aggregate_visibility(&self, cid: CommonId) -> Visibility {
        let mut aggregate = Visibility::HideWithPause;
        for h in self.handles_of(cid) {
            match self.live(h).map(|handle| handle.visible) {
                Some(Visibility::Show) => return Visibility::Show,
                Some(Visibility::Hide) => aggregate = Visibility::Hide,
                _ => {}
            }
        }
        aggregate
    }
}
