//! Public instance operations.
//!
//! Every call validates synchronously and either fails without touching
//! the queue or queues exactly the commands it needs. Outcomes that depend
//! on the provider arrive through the completion or the event handlers.

use super::{reply_status, PackageCompletion, SessionState, Viewer};
use crate::constants::{DEFAULT_CATEGORY, DEFAULT_CLUSTER, DEFAULT_CONTENT, DEFAULT_PERIOD};
use crate::error::{Result, ViewerError};
use crate::handlers::Event;
use crate::instance::{
    CommonId, CommonSeed, Completion, ContentType, InstanceState, Op, ShareKey, Visibility,
    WidgetHandle,
};
use crate::packet::Packet;
use crate::protocol::{AccessAction, DeleteType, KeyAction, MouseEvent, Surface};
use crate::rpc::{Command, RpcCompletion};
use crate::service::SizeType;

/// Confirmed instance addressed by a handle.
struct Target {
    cid: CommonId,
    pkgname: String,
    id: String,
}

impl Viewer {
    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Add a widget instance.
    ///
    /// Returns a fresh handle immediately. `cb` receives `Ok(0)` once the
    /// provider confirmed the instance (or on the next tick when an
    /// identical instance is shared), or the provider's error.
    ///
    /// # Errors
    ///
    /// - [`ViewerError::Fault`] before [`init`](Self::init).
    /// - [`ViewerError::InvalidParameter`] for an empty or unknown package,
    ///   a disabled package, a size the package does not support, or a NaN
    ///   period.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        pkgname: &str,
        content: Option<&str>,
        cluster: Option<&str>,
        category: Option<&str>,
        period: f64,
        size_type: SizeType,
        cb: Option<Completion>,
    ) -> Result<WidgetHandle> {
        if !self.initialized {
            return Err(ViewerError::Fault);
        }
        if pkgname.is_empty() || period.is_nan() {
            return Err(ViewerError::InvalidParameter);
        }
        let Some(widget_id) = self.service.resolve(pkgname) else {
            log::warn!("[Viewer] Unknown package '{}'", pkgname);
            return Err(ViewerError::InvalidParameter);
        };
        if !self.service.is_enabled(&widget_id) {
            log::warn!("[Viewer] Package '{}' is disabled", widget_id);
            return Err(ViewerError::InvalidParameter);
        }
        let (width, height) = self
            .service
            .size(&widget_id, size_type)
            .ok_or(ViewerError::InvalidParameter)?;

        let content = content.unwrap_or(DEFAULT_CONTENT);
        let cluster = cluster.unwrap_or(DEFAULT_CLUSTER);
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let period = if period < 0.0 { DEFAULT_PERIOD } else { period };

        let h = self.store.create_handle(true);
        if let (Some(cb), Some(handle)) = (cb, self.store.handle_mut(h)) {
            handle.set_callback(Op::Created, cb);
        }

        let key = ShareKey {
            pkgname: &widget_id,
            content,
            cluster,
            category,
            width,
            height,
        };
        if self.options.shared_content {
            if let Some(cid) = self.store.find_sharable(&key) {
                log::debug!("[Viewer] Sharing existing instance of {}", widget_id);
                self.store.attach(h, cid);
                self.defer_for(h, |v, h| {
                    if v.store.live(h).is_some() {
                        v.complete_or_emit(h, Op::Created, Ok(0), Event::Created);
                    }
                });
                self.sync_visibility(cid);
                return Ok(h);
            }
        }

        let seed = CommonSeed {
            pkgname: widget_id.clone(),
            content: content.to_owned(),
            cluster: cluster.to_owned(),
            category: category.to_owned(),
            period,
            width,
            height,
            timestamp: self.next_timestamp(),
        };
        let cid = self.store.create_common(seed);
        self.request_new(h, cid);
        log::info!("[Viewer] Adding {} ({}x{})", widget_id, width, height);
        Ok(h)
    }

    /// Attach `h` to a fresh common and queue its `new` request.
    fn request_new(&mut self, h: WidgetHandle, cid: CommonId) {
        let Some(common) = self.store.common_mut(cid) else {
            return;
        };
        let _ = common.request.claim(Op::Created);
        let packet = Packet::new("new")
            .arg(common.timestamp)
            .arg(common.pkgname.as_str())
            .arg(common.content.as_str())
            .arg(common.cluster.as_str())
            .arg(common.category.as_str())
            .arg(common.period)
            .arg(common.main.width)
            .arg(common.main.height);
        let pkgname = common.pkgname.clone();
        self.store.attach(h, cid);

        let completion: RpcCompletion = Box::new(move |v, _, reply| v.on_new_reply(cid, reply));
        let command = Command::acked(packet, self.config.rpc_ttl, completion).owned_by(h, &pkgname);
        self.enqueue(command, false);
    }

    fn on_new_reply(&mut self, cid: CommonId, reply: Option<&Packet>) {
        let Err(e) = reply_status(reply) else {
            return;
        };
        let Some(common) = self.store.common_mut(cid) else {
            return;
        };
        common.request.release(Op::Created);
        if common.is_created() {
            return;
        }
        log::warn!("[Viewer] Creating {} failed: {}", common.pkgname, e);
        for h in self.store.handles_of(cid) {
            let relinking = self.store.handle(h).is_some_and(|handle| handle.relinking);
            self.complete(h, Op::Created, Err(e));
            if relinking {
                self.emit(h, Event::Deleted);
            }
            self.destroy_handle(h);
        }
        self.store.destroy_common(cid);
    }

    /// Delete an instance.
    ///
    /// While other handles share the instance only this handle goes away
    /// and `cb` gets `Ok(0)` on the next tick. The last subscriber asks the
    /// provider to delete; `cb` fires on the provider's `deleted` event.
    ///
    /// # Errors
    ///
    /// - [`ViewerError::InvalidParameter`] for a stale handle.
    /// - [`ViewerError::Busy`] if a delete is already in flight.
    /// - [`ViewerError::PermissionDenied`] for provider-announced instances.
    pub fn delete(&mut self, h: WidgetHandle, delete_type: DeleteType, cb: Option<Completion>) -> Result<()> {
        let handle = self
            .store
            .handle(h)
            .filter(|handle| handle.state != InstanceState::Destroyed)
            .ok_or(ViewerError::InvalidParameter)?;
        if handle.state == InstanceState::Delete {
            return Err(ViewerError::Busy);
        }
        if !handle.is_user {
            return Err(ViewerError::PermissionDenied);
        }
        let cid = handle.common.ok_or(ViewerError::InvalidParameter)?;
        let common = self.store.common(cid).ok_or(ViewerError::InvalidParameter)?;

        if common.refcnt > 1 || !common.is_created() {
            let last = common.refcnt <= 1;
            self.delete_locally(h, cb);
            if let Some(common) = self.store.common_mut(cid) {
                if last {
                    log::debug!("[Viewer] Deleting {} before confirmation", common.pkgname);
                    common.state = InstanceState::Delete;
                    common.delete_type = delete_type;
                }
            }
            self.sync_visibility(cid);
            return Ok(());
        }

        let (pkgname, id) = common.target()?;
        let packet = Packet::new("delete")
            .arg(pkgname.as_str())
            .arg(id.as_str())
            .arg(delete_type.code())
            .arg(common.timestamp);
        if let Some(common) = self.store.common_mut(cid) {
            common.request.claim(Op::Deleted)?;
            common.state = InstanceState::Delete;
        }
        if let Some(handle) = self.store.handle_mut(h) {
            handle.state = InstanceState::Delete;
            if let Some(cb) = cb {
                handle.set_callback(Op::Deleted, cb);
            }
        }
        log::info!("[Viewer] Deleting {} {}", pkgname, id);

        let completion: RpcCompletion = Box::new(move |v, h, reply| v.on_delete_reply(cid, h, reply));
        let command = Command::acked(packet, self.config.rpc_ttl, completion).owned_by(h, &pkgname);
        self.enqueue(command, false);
        Ok(())
    }

    /// Drop `h` without a provider round trip. A pending creation
    /// completion is cancelled; `cb` succeeds on the next tick.
    fn delete_locally(&mut self, h: WidgetHandle, cb: Option<Completion>) {
        let created = self
            .store
            .handle_mut(h)
            .and_then(|handle| handle.take_callback(Op::Created));
        self.defer_for(h, move |v, h| {
            if let Some(created) = created {
                created(v, h, Err(ViewerError::Canceled));
            }
            if let Some(cb) = cb {
                cb(v, h, Ok(0));
            }
        });
        self.destroy_handle(h);
    }

    fn on_delete_reply(&mut self, cid: CommonId, h: Option<WidgetHandle>, reply: Option<&Packet>) {
        // Dropped by a disconnect: the instance is gone with the provider,
        // and the disconnect handler completes the delete with success.
        if reply.is_none() && self.state == SessionState::Disconnected {
            return;
        }
        let Err(e) = reply_status(reply) else {
            return;
        };
        log::warn!("[Viewer] Delete request failed: {}", e);
        if let Some(common) = self.store.common_mut(cid) {
            common.request.release(Op::Deleted);
            if common.state == InstanceState::Delete {
                common.state = InstanceState::Create;
            }
        }
        let Some(h) = h else {
            return;
        };
        if let Some(handle) = self.store.handle_mut(h) {
            if handle.state == InstanceState::Delete {
                handle.state = InstanceState::Create;
            }
        }
        self.complete(h, Op::Deleted, Err(e));
    }

    /// Change the size class of an instance.
    ///
    /// A sole subscriber resizes the provider instance. A handle sharing its
    /// instance is moved to an instance of the new size instead, so the
    /// other subscribers keep theirs.
    ///
    /// # Errors
    ///
    /// - [`ViewerError::InvalidParameter`] for a stale handle or a size the
    ///   package does not support.
    /// - [`ViewerError::PermissionDenied`] for provider-announced instances.
    /// - [`ViewerError::Fault`] before the instance is confirmed.
    /// - [`ViewerError::AlreadyExist`] if the size is current.
    /// - [`ViewerError::Busy`] if a resize is already in flight.
    pub fn resize(&mut self, h: WidgetHandle, size_type: SizeType, cb: Option<Completion>) -> Result<()> {
        let target = self.user_target(h)?;
        let (width, height) = self
            .service
            .size(&target.pkgname, size_type)
            .ok_or(ViewerError::InvalidParameter)?;
        let common = self.store.common(target.cid).ok_or(ViewerError::InvalidParameter)?;
        if (common.main.width, common.main.height) == (width, height) {
            return Err(ViewerError::AlreadyExist);
        }

        if common.refcnt > 1 {
            return self.relink(h, target.cid, width, height, cb);
        }

        let packet = Packet::new("resize")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(width)
            .arg(height);
        self.request_op(h, target.cid, Op::SizeChanged, &target.pkgname, packet, cb)
    }

    fn relink(
        &mut self,
        h: WidgetHandle,
        old: CommonId,
        width: u32,
        height: u32,
        cb: Option<Completion>,
    ) -> Result<()> {
        let common = self.store.common(old).ok_or(ViewerError::InvalidParameter)?;
        let mut seed = CommonSeed {
            pkgname: common.pkgname.clone(),
            content: common.content.clone(),
            cluster: common.cluster.clone(),
            category: common.category.clone(),
            period: common.period,
            width,
            height,
            timestamp: 0.0,
        };
        log::info!(
            "[Viewer] Moving a subscriber of {} to {}x{}",
            seed.pkgname,
            width,
            height
        );
        self.store.detach(h);
        self.sync_visibility(old);

        let key = ShareKey {
            pkgname: &seed.pkgname,
            content: &seed.content,
            cluster: &seed.cluster,
            category: &seed.category,
            width,
            height,
        };
        let existing = if self.options.shared_content {
            self.store.find_sharable(&key)
        } else {
            None
        };
        if let Some(cid) = existing {
            self.store.attach(h, cid);
            self.defer_for(h, move |v, h| {
                if v.store.live(h).is_none() {
                    return;
                }
                match cb {
                    Some(cb) => cb(v, h, Ok(0)),
                    None => v.emit(h, Event::SizeChanged(Surface::Main)),
                }
            });
            self.sync_visibility(cid);
            return Ok(());
        }

        seed.timestamp = self.next_timestamp();
        let cid = self.store.create_common(seed);
        let cb: Completion = match cb {
            Some(cb) => cb,
            None => Box::new(|v: &mut Viewer, h: WidgetHandle, result: Result<i32>| {
                if result.is_ok() {
                    v.emit(h, Event::SizeChanged(Surface::Main));
                }
            }),
        };
        if let Some(handle) = self.store.handle_mut(h) {
            handle.relinking = true;
            handle.set_callback(Op::Created, cb);
        }
        self.request_new(h, cid);
        Ok(())
    }

    // ── Flag-guarded requests ───────────────────────────────────────────────

    /// Claim `op` on the common, park `cb` on the handle and queue `packet`.
    fn request_op(
        &mut self,
        h: WidgetHandle,
        cid: CommonId,
        op: Op,
        pkgname: &str,
        packet: Packet,
        cb: Option<Completion>,
    ) -> Result<()> {
        self.store
            .common_mut(cid)
            .ok_or(ViewerError::InvalidParameter)?
            .request
            .claim(op)?;
        if let (Some(cb), Some(handle)) = (cb, self.store.handle_mut(h)) {
            if handle.set_callback(op, cb).is_some() {
                log::debug!("[Viewer] Superseded {:?} completion on {:?}", op, h);
            }
        }
        let completion: RpcCompletion = Box::new(move |v, h, reply| v.on_op_reply(cid, h, op, reply));
        let command = Command::acked(packet, self.config.rpc_ttl, completion).owned_by(h, pkgname);
        self.enqueue(command, false);
        Ok(())
    }

    /// A failed reply ends the operation; success waits for the event.
    fn on_op_reply(&mut self, cid: CommonId, h: Option<WidgetHandle>, op: Op, reply: Option<&Packet>) {
        let Err(e) = reply_status(reply) else {
            return;
        };
        log::warn!("[Viewer] {:?} request failed: {}", op, e);
        if let Some(common) = self.store.common_mut(cid) {
            common.request.release(op);
        }
        if let Some(h) = h {
            self.complete(h, op, Err(e));
        }
    }

    /// Change the update period.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle or negative period,
    /// `PermissionDenied`, `Fault` while unconfirmed, `AlreadyExist`, `Busy`.
    pub fn set_period(&mut self, h: WidgetHandle, period: f64, cb: Option<Completion>) -> Result<()> {
        let target = self.user_target(h)?;
        if period.is_nan() || period < 0.0 {
            return Err(ViewerError::InvalidParameter);
        }
        let current = self.store.common(target.cid).map(|c| c.period);
        if current.is_some_and(|p| p.to_bits() == period.to_bits()) {
            return Err(ViewerError::AlreadyExist);
        }
        let packet = Packet::new("set_period")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(period);
        self.request_op(h, target.cid, Op::PeriodChanged, &target.pkgname, packet, cb)
    }

    /// Move the instance to another cluster/category.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle or empty names,
    /// `PermissionDenied`, `Fault` while unconfirmed, `AlreadyExist`, `Busy`.
    pub fn set_group(
        &mut self,
        h: WidgetHandle,
        cluster: &str,
        category: &str,
        cb: Option<Completion>,
    ) -> Result<()> {
        let target = self.user_target(h)?;
        if cluster.is_empty() || category.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        let unchanged = self
            .store
            .common(target.cid)
            .is_some_and(|c| c.cluster == cluster && c.category == category);
        if unchanged {
            return Err(ViewerError::AlreadyExist);
        }
        let packet = Packet::new("change_group")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(cluster)
            .arg(category);
        self.request_op(h, target.cid, Op::GroupChanged, &target.pkgname, packet, cb)
    }

    /// Pin the content up (or release it).
    ///
    /// # Errors
    ///
    /// `NotSupported` if the instance cannot be pinned, plus the usual
    /// `InvalidParameter`, `PermissionDenied`, `Fault`, `AlreadyExist`, `Busy`.
    pub fn set_pinup(&mut self, h: WidgetHandle, pinup: bool, cb: Option<Completion>) -> Result<()> {
        let target = self.user_target(h)?;
        let common = self.store.common(target.cid).ok_or(ViewerError::InvalidParameter)?;
        if !common.pinup_supported {
            return Err(ViewerError::NotSupported);
        }
        if common.is_pinned_up == pinup {
            return Err(ViewerError::AlreadyExist);
        }
        let packet = Packet::new("pinup_changed")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(pinup);
        self.request_op(h, target.cid, Op::Pinup, &target.pkgname, packet, cb)
    }

    /// Switch between active (provider pushed) and passive updates.
    ///
    /// # Errors
    ///
    /// `InvalidParameter`, `PermissionDenied`, `Fault`, `AlreadyExist`, `Busy`.
    pub fn set_update_mode(&mut self, h: WidgetHandle, active: bool, cb: Option<Completion>) -> Result<()> {
        let target = self.user_target(h)?;
        if self
            .store
            .common(target.cid)
            .is_some_and(|c| c.is_active_update == active)
        {
            return Err(ViewerError::AlreadyExist);
        }
        let packet = Packet::new("update_mode")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(active);
        self.request_op(h, target.cid, Op::UpdateMode, &target.pkgname, packet, cb)
    }

    /// Forward an accessibility action. `cb` receives the provider's
    /// access status.
    ///
    /// # Errors
    ///
    /// `InvalidParameter`, `Fault` while unconfirmed, `Busy`.
    pub fn access_event(
        &mut self,
        h: WidgetHandle,
        action: AccessAction,
        x: i32,
        y: i32,
        cb: Option<Completion>,
    ) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new(self.generation.access(action))
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(self.next_timestamp())
            .arg(x)
            .arg(y);
        self.request_op(h, target.cid, Op::AccessEvent, &target.pkgname, packet, cb)
    }

    /// Forward a key action. `cb` receives the provider's key status.
    ///
    /// # Errors
    ///
    /// `InvalidParameter`, `Fault` while unconfirmed, `Busy`.
    pub fn key_event(
        &mut self,
        h: WidgetHandle,
        action: KeyAction,
        keycode: u32,
        cb: Option<Completion>,
    ) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new(self.generation.key(action))
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(self.next_timestamp())
            .arg(keycode);
        self.request_op(h, target.cid, Op::KeyEvent, &target.pkgname, packet, cb)
    }

    /// Open the secondary surface at a relative position (`0.0..=1.0`).
    ///
    /// # Errors
    ///
    /// `AlreadyExist` if it is open, plus `InvalidParameter`, `Fault`, `Busy`.
    pub fn create_gbar(&mut self, h: WidgetHandle, x: f64, y: f64, cb: Option<Completion>) -> Result<()> {
        let target = self.target(h)?;
        if self.store.common(target.cid).is_some_and(|c| c.gbar_created) {
            return Err(ViewerError::AlreadyExist);
        }
        let packet = Packet::new(self.generation.create_secondary())
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(x)
            .arg(y);
        self.request_op(h, target.cid, Op::GbarCreated, &target.pkgname, packet, cb)
    }

    /// Close the secondary surface.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if it is not open, plus `Fault`, `Busy`.
    pub fn destroy_gbar(&mut self, h: WidgetHandle, cb: Option<Completion>) -> Result<()> {
        let target = self.target(h)?;
        if !self.store.common(target.cid).is_some_and(|c| c.gbar_created) {
            return Err(ViewerError::InvalidParameter);
        }
        let packet = Packet::new(self.generation.destroy_secondary())
            .arg(target.pkgname.as_str())
            .arg(target.id);
        self.request_op(h, target.cid, Op::GbarDestroyed, &target.pkgname, packet, cb)
    }

    // ── Visibility ──────────────────────────────────────────────────────────

    /// Change this subscriber's visibility.
    ///
    /// The provider only hears about the aggregate over all subscribers,
    /// and only when it changes.
    ///
    /// # Errors
    ///
    /// - [`ViewerError::InvalidParameter`] for a stale handle.
    /// - [`ViewerError::AlreadyExist`] if `visibility` is current.
    /// - [`ViewerError::PermissionDenied`] pausing a provider-announced instance.
    /// - [`ViewerError::Fault`] before the instance is confirmed.
    pub fn set_visibility(&mut self, h: WidgetHandle, visibility: Visibility) -> Result<()> {
        let cid = self.common_of(h)?;
        let handle = self.store.live(h).ok_or(ViewerError::InvalidParameter)?;
        if handle.visible == visibility {
            return Err(ViewerError::AlreadyExist);
        }
        if !handle.is_user && visibility == Visibility::HideWithPause {
            return Err(ViewerError::PermissionDenied);
        }
        self.store
            .common(cid)
            .ok_or(ViewerError::InvalidParameter)?
            .target()?;

        let mut replay = false;
        if let Some(handle) = self.store.handle_mut(h) {
            let previous = std::mem::replace(&mut handle.visible, visibility);
            if previous == Visibility::HideWithPause && handle.paused_updating > 0 {
                log::debug!(
                    "[Viewer] {:?} resumes after {} paused updates",
                    h,
                    handle.paused_updating
                );
                handle.paused_updating = 0;
                replay = true;
            }
        }
        if replay {
            self.defer_for(h, |v, h| {
                if v.store.live(h).is_some() {
                    v.emit(h, Event::Updated(Surface::Main));
                }
            });
        }
        self.sync_visibility(cid);
        Ok(())
    }

    // ── Fire-and-forget ─────────────────────────────────────────────────────

    fn notify_for(&mut self, h: WidgetHandle, pkgname: &str, packet: Packet) {
        self.enqueue(Command::notify(packet).owned_by(h, pkgname), false);
    }

    /// Report a click at a relative position.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle, `Fault` while unconfirmed.
    pub fn click(&mut self, h: WidgetHandle, x: f64, y: f64) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new("clicked")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg("clicked")
            .arg(self.next_timestamp())
            .arg(x)
            .arg(y);
        self.notify_for(h, &target.pkgname, packet);
        Ok(())
    }

    /// Forward a pointer event to a surface.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle or a closed secondary surface,
    /// `Fault` while unconfirmed.
    pub fn mouse_event(&mut self, h: WidgetHandle, surface: Surface, event: MouseEvent, x: f64, y: f64) -> Result<()> {
        let target = self.target(h)?;
        if surface == Surface::Secondary && !self.store.common(target.cid).is_some_and(|c| c.gbar_created) {
            return Err(ViewerError::InvalidParameter);
        }
        let packet = Packet::new(self.generation.mouse(surface, event))
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(self.next_timestamp())
            .arg(x)
            .arg(y);
        self.notify_for(h, &target.pkgname, packet);
        Ok(())
    }

    /// Move the open secondary surface.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if it is not open, `Fault` while unconfirmed.
    pub fn move_gbar(&mut self, h: WidgetHandle, x: f64, y: f64) -> Result<()> {
        let target = self.target(h)?;
        if !self.store.common(target.cid).is_some_and(|c| c.gbar_created) {
            return Err(ViewerError::InvalidParameter);
        }
        let packet = Packet::new(self.generation.move_secondary())
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(x)
            .arg(y);
        self.notify_for(h, &target.pkgname, packet);
        Ok(())
    }

    /// Ask the provider for fresh content.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle, `Fault` while unconfirmed.
    pub fn refresh(&mut self, h: WidgetHandle, force: bool) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new("update")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(force);
        self.notify_for(h, &target.pkgname, packet);
        Ok(())
    }

    /// Give a pixmap obtained with [`acquire_pixmap`](Self::acquire_pixmap) back.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle, `Fault` while unconfirmed.
    pub fn release_pixmap(&mut self, h: WidgetHandle, surface: Surface, pixmap: u32) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new(self.generation.release_pixmap(surface))
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(pixmap);
        self.notify_for(h, &target.pkgname, packet);
        Ok(())
    }

    fn notify_group(&mut self, packet: Packet) -> Result<()> {
        if !self.initialized {
            return Err(ViewerError::Fault);
        }
        self.enqueue(Command::notify(packet), false);
        Ok(())
    }

    /// Receive instances created in a cluster/category by other viewers.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for empty names, `Fault` before init.
    pub fn subscribe_group(&mut self, cluster: &str, category: &str) -> Result<()> {
        if cluster.is_empty() || category.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        self.notify_group(Packet::new("subscribe").arg(cluster).arg(category))
    }

    /// Undo [`subscribe_group`](Self::subscribe_group).
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for empty names, `Fault` before init.
    pub fn unsubscribe_group(&mut self, cluster: &str, category: &str) -> Result<()> {
        if cluster.is_empty() || category.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        self.notify_group(Packet::new("unsubscribe").arg(cluster).arg(category))
    }

    /// Refresh every instance of a cluster/category.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for empty names, `Fault` before init.
    pub fn refresh_group(&mut self, cluster: &str, category: &str, force: bool) -> Result<()> {
        if cluster.is_empty() || category.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        self.notify_group(Packet::new("refresh_group").arg(cluster).arg(category).arg(force))
    }

    /// Delete every instance of a cluster.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty name, `Fault` before init.
    pub fn delete_cluster(&mut self, cluster: &str) -> Result<()> {
        if cluster.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        self.notify_group(Packet::new("delete_cluster").arg(cluster))
    }

    /// Delete every instance of a category.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for empty names, `Fault` before init.
    pub fn delete_category(&mut self, cluster: &str, category: &str) -> Result<()> {
        if cluster.is_empty() || category.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        self.notify_group(Packet::new("delete_category").arg(cluster).arg(category))
    }

    // ── Acknowledged, unguarded ─────────────────────────────────────────────

    /// Emit a layout signal into a text-type instance. `cb` gets the
    /// provider status.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle or a non-text instance,
    /// `Fault` while unconfirmed.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_text_signal(
        &mut self,
        h: WidgetHandle,
        emission: &str,
        source: &str,
        sx: f64,
        sy: f64,
        ex: f64,
        ey: f64,
        cb: Option<Completion>,
    ) -> Result<()> {
        let target = self.target(h)?;
        let is_text = self.store.common(target.cid).is_some_and(|c| {
            c.main.content_type == ContentType::Text || c.secondary.content_type == ContentType::Text
        });
        if !is_text || emission.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        let packet = Packet::new("text_signal")
            .arg(target.pkgname.as_str())
            .arg(target.id)
            .arg(emission)
            .arg(source)
            .arg(sx)
            .arg(sy)
            .arg(ex)
            .arg(ey);
        let completion: RpcCompletion = Box::new(move |v, h, reply| {
            if let (Some(cb), Some(h)) = (cb, h) {
                cb(v, h, reply_status(reply));
            }
        });
        let command = Command::acked(packet, self.config.rpc_ttl, completion).owned_by(h, &target.pkgname);
        self.enqueue(command, false);
        Ok(())
    }

    /// Ask the provider for the pixmap of a surface. `cb` receives the
    /// pixmap id.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a stale handle, `Fault` while unconfirmed.
    pub fn acquire_pixmap(&mut self, h: WidgetHandle, surface: Surface, cb: Completion) -> Result<()> {
        let target = self.target(h)?;
        let packet = Packet::new(self.generation.acquire_pixmap(surface))
            .arg(target.pkgname.as_str())
            .arg(target.id);
        let completion: RpcCompletion = Box::new(move |v, h, reply| {
            let result = reply_status(reply).and_then(|_| match reply {
                Some(packet) => packet.int32(1),
                None => Err(ViewerError::Fault),
            });
            if let Some(h) = h {
                cb(v, h, result);
            }
        });
        let command = Command::acked(packet, self.config.rpc_ttl, completion).owned_by(h, &target.pkgname);
        self.enqueue(command, false);
        Ok(())
    }

    /// Ask the provider to (re)activate a faulted package.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty name, `Fault` before init.
    pub fn activate(&mut self, pkgname: &str, cb: Option<PackageCompletion>) -> Result<()> {
        if pkgname.is_empty() {
            return Err(ViewerError::InvalidParameter);
        }
        if !self.initialized {
            return Err(ViewerError::Fault);
        }
        let packet = Packet::new("activate_package").arg(pkgname);
        let completion: RpcCompletion = Box::new(move |v, _, reply| {
            let status = reply_status(reply);
            if let Err(e) = status {
                log::warn!("[Viewer] Activation failed: {}", e);
            }
            if let Some(cb) = cb {
                cb(v, status);
            }
        });
        let command = Command::acked(packet, self.config.rpc_ttl, completion).for_package(pkgname);
        self.enqueue(command, false);
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────────────

    /// Live handle with a confirmed common.
    fn target(&self, h: WidgetHandle) -> Result<Target> {
        let cid = self.common_of(h)?;
        let common = self.store.common(cid).ok_or(ViewerError::InvalidParameter)?;
        let (pkgname, id) = common.target()?;
        Ok(Target { cid, pkgname, id })
    }

    /// As [`target`](Self::target), for operations reserved to this
    /// client's own instances.
    fn user_target(&self, h: WidgetHandle) -> Result<Target> {
        let handle = self.store.live(h).ok_or(ViewerError::InvalidParameter)?;
        if !handle.is_user {
            return Err(ViewerError::PermissionDenied);
        }
        self.target(h)
    }
}
