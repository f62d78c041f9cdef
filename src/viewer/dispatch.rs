//! Inbound provider events.
//!
//! Each handler resolves the shared record the event is about, updates it
//! and then either fires the per-handle completion that was waiting for the
//! event or falls back to the event handler list. Malformed packets and
//! events for unknown instances are logged and dropped.

use std::path::Path;

use super::{reply_status, Viewer};
use crate::desc::{self, ScriptOperators};
use crate::error::{Result, ViewerError};
use crate::handlers::{Event, Fault};
use crate::instance::{CommonId, ContentType, InstanceState, Op, WidgetHandle};
use crate::packet::Packet;
use crate::protocol::{InboundCommand, Surface};
use crate::rpc::{Command, RpcCompletion};
use crate::service::SizeType;

impl Viewer {
    pub(crate) fn dispatch_event(&mut self, packet: &Packet) {
        let Some(command) = self.generation.parse_inbound(&packet.command) else {
            log::warn!("[Viewer] Unknown provider command '{}'", packet.command);
            return;
        };
        log::trace!("[Viewer] Inbound {:?}", command);

        let result = match command {
            InboundCommand::Created => self.on_created(packet),
            InboundCommand::Deleted => self.on_deleted(packet),
            InboundCommand::Updated(surface) => self.on_updated(surface, packet),
            InboundCommand::UpdateBegin(surface) => self.on_update_mark(packet, Event::UpdateBegin(surface)),
            InboundCommand::UpdateEnd(surface) => self.on_update_mark(packet, Event::UpdateEnd(surface)),
            InboundCommand::SizeChanged => self.on_size_changed(packet),
            InboundCommand::PeriodChanged => self.on_period_changed(packet),
            InboundCommand::GroupChanged => self.on_group_changed(packet),
            InboundCommand::Pinup => self.on_pinup(packet),
            InboundCommand::UpdateMode => self.on_update_mode(packet),
            InboundCommand::AccessStatus => self.on_status(packet, Op::AccessEvent),
            InboundCommand::KeyStatus => self.on_status(packet, Op::KeyEvent),
            InboundCommand::SecondaryCreated => self.on_gbar_created(packet),
            InboundCommand::SecondaryDestroyed => self.on_gbar_destroyed(packet),
            InboundCommand::CloseSecondary => self.on_close_gbar(packet),
            InboundCommand::ExtraBufferCreated(surface) => self.on_extra_buffer(surface, packet, true),
            InboundCommand::ExtraBufferDestroyed(surface) => self.on_extra_buffer(surface, packet, false),
            InboundCommand::ExtraBufferUpdated(surface) => self.on_extra_buffer_updated(surface, packet),
            InboundCommand::ExtraInfo => self.on_extra_info(packet),
            InboundCommand::FaultPackage => self.on_fault_package(packet),
        };
        if let Err(e) = result {
            log::warn!("[Viewer] Dropping '{}': {}", packet.command, e);
        }
    }

    /// Common named by the `(pkgname, id)` prefix of an event.
    fn lookup(&self, packet: &Packet) -> Result<CommonId> {
        let pkgname = packet.str(0)?;
        let id = packet.str(1)?;
        self.store.find_by_id(pkgname, id).ok_or_else(|| {
            log::debug!("[Viewer] '{}' for unknown instance {} {}", packet.command, pkgname, id);
            ViewerError::InvalidParameter
        })
    }

    /// End a flag-guarded operation on every subscriber.
    fn finish_op(&mut self, cid: CommonId, op: Op, status: Result<i32>, event: Event) {
        if let Some(common) = self.store.common_mut(cid) {
            common.request.release(op);
        }
        for h in self.store.handles_of(cid) {
            self.complete_or_emit(h, op, status, event);
        }
    }

    /// Emit to subscribers that are not paused; paused ones count the update.
    fn deliver_update(&mut self, cid: CommonId, event: Event) {
        for h in self.store.handles_of(cid) {
            if self.is_paused(h) {
                if let Some(handle) = self.store.handle_mut(h) {
                    handle.paused_updating += 1;
                }
            } else {
                self.emit(h, event);
            }
        }
    }

    fn emit_all(&mut self, cid: CommonId, event: Event) {
        for h in self.store.handles_of(cid) {
            self.emit(h, event);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    fn on_created(&mut self, packet: &Packet) -> Result<()> {
        let pkgname = packet.str(0)?;
        let id = packet.str(1)?;
        let timestamp = packet.double(2)?;
        let content = packet.str(3)?;
        let title = packet.str(4)?;
        let cluster = packet.str(5)?;
        let category = packet.str(6)?;
        let width = dimension(packet, 7)?;
        let height = dimension(packet, 8)?;
        let gbar_width = dimension(packet, 9)?;
        let gbar_height = dimension(packet, 10)?;
        let main_type = ContentType::from_code(packet.int(11)?);
        let gbar_type = ContentType::from_code(packet.int(12)?);
        let fbfile = packet.str(13)?;
        let period = packet.double(14)?;
        let priority = packet.double(15)?;
        let pinup_supported = packet.int(16)? != 0;
        let pinned_up = packet.int(17)? != 0;

        if self.store.find_by_id(pkgname, id).is_some() {
            log::debug!("[Viewer] Duplicate 'created' for {} {}", pkgname, id);
            return Ok(());
        }

        let cid = match self.store.find_by_timestamp(timestamp) {
            Some(cid) => cid,
            None => {
                log::info!("[Viewer] Provider announced {} {}", pkgname, id);
                let cid = self.store.create_remote_common(pkgname, id, timestamp);
                let h = self.store.create_handle(false);
                self.store.attach(h, cid);
                cid
            }
        };

        let Some(common) = self.store.common_mut(cid) else {
            return Ok(());
        };
        common.id = Some(id.to_owned());
        common.content = content.to_owned();
        common.title = title.to_owned();
        common.cluster = cluster.to_owned();
        common.category = category.to_owned();
        common.period = period;
        common.priority = priority;
        common.pinup_supported = pinup_supported;
        common.is_pinned_up = pinned_up;
        common.size_type = SizeType::from_pixels(width, height);
        common.main.width = width;
        common.main.height = height;
        common.main.content_type = main_type;
        common.secondary.width = gbar_width;
        common.secondary.height = gbar_height;
        common.secondary.content_type = gbar_type;
        common.request.release(Op::Created);
        if main_type != ContentType::Text {
            if let Err(e) = common.main.rebind(fbfile) {
                log::warn!("[Viewer] {} {}: cannot bind '{}': {}", pkgname, id, fbfile, e);
            }
        }

        if common.state == InstanceState::Delete {
            log::info!("[Viewer] {} {} was deleted before confirmation", pkgname, id);
            let packet = Packet::new("delete")
                .arg(pkgname)
                .arg(id)
                .arg(common.delete_type.code())
                .arg(common.timestamp);
            let completion: RpcCompletion = Box::new(move |v, _, reply| {
                if let Err(e) = reply_status(reply) {
                    log::warn!("[Viewer] Deleting unconfirmed instance failed: {}", e);
                    v.store.destroy_common(cid);
                }
            });
            let command = Command::acked(packet, self.config.rpc_ttl, completion).for_package(pkgname);
            self.enqueue(command, false);
            return Ok(());
        }

        log::info!("[Viewer] Created {} {} ({}x{})", pkgname, id, width, height);
        for h in self.store.handles_of(cid) {
            if let Some(handle) = self.store.handle_mut(h) {
                handle.relinking = false;
            }
            self.complete_or_emit(h, Op::Created, Ok(0), Event::Created);
        }
        self.sync_visibility(cid);
        Ok(())
    }

    fn on_deleted(&mut self, packet: &Packet) -> Result<()> {
        let pkgname = packet.str(0)?;
        let id = packet.str(1)?;
        let timestamp = packet.double(2)?;
        let reason = packet.int32(3)?;

        let cid = self
            .store
            .find_by_id(pkgname, id)
            .or_else(|| self.store.find_by_timestamp(timestamp))
            .ok_or(ViewerError::InvalidParameter)?;
        let confirmed = self.store.common(cid).is_some_and(|c| c.is_created());
        log::info!("[Viewer] Deleted {} {} (reason {})", pkgname, id, reason);

        for h in self.store.handles_of(cid) {
            let creating = !confirmed || self.store.handle(h).is_some_and(|handle| handle.has_callback(Op::Created));
            if creating {
                self.complete(h, Op::Created, Err(ViewerError::Canceled));
            } else if !self.complete(h, Op::Deleted, ViewerError::check(reason)) {
                self.emit(h, Event::Deleted);
            }
            self.destroy_handle(h);
        }
        self.store.destroy_common(cid);
        Ok(())
    }

    // ── Content ─────────────────────────────────────────────────────────────

    fn on_updated(&mut self, surface: Surface, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let fbfile = packet.str(2)?;
        let width = dimension(packet, 3)?;
        let height = dimension(packet, 4)?;
        let details = match surface {
            Surface::Main => Some((packet.double(5)?, packet.str(6)?, packet.str(7)?)),
            Surface::Secondary => None,
        };

        let frame_drop = self.options.frame_drop_for_resize;
        let manual_sync = self.options.manual_sync;
        let Some(common) = self.store.common_mut(cid) else {
            return Ok(());
        };
        if common.state != InstanceState::Create {
            return Ok(());
        }
        if frame_drop && surface == Surface::Main && common.request.contains(Op::SizeChanged) {
            log::debug!("[Viewer] Dropping frame of {} while resizing", common.pkgname);
            return Ok(());
        }
        if let Some((priority, content, title)) = details {
            common.priority = priority;
            common.content = content.to_owned();
            common.title = title.to_owned();
        }

        let state = common.surface_mut(surface);
        let is_text = state.content_type == ContentType::Text;
        if !is_text {
            let stale = state
                .fb
                .as_ref()
                .map_or(true, |fb| fb.id() != fbfile || fb.size() != (width, height));
            state.width = width;
            state.height = height;
            if stale {
                state.rebind(fbfile)?;
            }
            if !manual_sync {
                if let Some(fb) = &state.fb {
                    fb.sync()?;
                }
            }
        } else {
            state.width = width;
            state.height = height;
        }

        if is_text {
            self.replay_descriptor(cid, surface, fbfile);
        }
        self.deliver_update(cid, Event::Updated(surface));
        Ok(())
    }

    /// Replay a descriptor file against every subscriber's operators for
    /// `surface`. Paused subscribers get the content too; only their
    /// update event is held back.
    fn replay_descriptor(&mut self, cid: CommonId, surface: Surface, path: &str) {
        let path = path.strip_prefix("file://").unwrap_or(path);
        let mut taken: Vec<(WidgetHandle, Box<dyn ScriptOperators>)> = Vec::new();
        for h in self.store.handles_of(cid) {
            if let Some(ops) = self.store.handle_mut(h).and_then(|handle| handle.ops_slot(surface).take()) {
                taken.push((h, ops));
            }
        }
        if taken.is_empty() {
            return;
        }

        let mut subscribers: Vec<(WidgetHandle, &mut dyn ScriptOperators)> = taken
            .iter_mut()
            .map(|(h, ops)| (*h, &mut **ops as &mut dyn ScriptOperators))
            .collect();
        match desc::load_and_apply(Path::new(path), &mut subscribers) {
            Ok(n) => log::debug!("[Desc] Applied {} records from {}", n, path),
            Err(e) => log::warn!("[Desc] Skipped {}: {}", path, e),
        }
        drop(subscribers);

        for (h, ops) in taken {
            if let Some(handle) = self.store.handle_mut(h) {
                let slot = handle.ops_slot(surface);
                if slot.is_none() {
                    *slot = Some(ops);
                }
            }
        }
    }

    fn on_update_mark(&mut self, packet: &Packet, event: Event) -> Result<()> {
        let cid = self.lookup(packet)?;
        for h in self.store.handles_of(cid) {
            if !self.is_paused(h) {
                self.emit(h, event);
            }
        }
        Ok(())
    }

    // ── Operation results ───────────────────────────────────────────────────

    fn on_size_changed(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let surface = if packet.int(2)? != 0 {
            Surface::Secondary
        } else {
            Surface::Main
        };
        let width = dimension(packet, 3)?;
        let height = dimension(packet, 4)?;
        let fbfile = packet.str(5)?;
        let status = packet.int32(6).and_then(ViewerError::check);

        if status.is_ok() {
            if let Some(common) = self.store.common_mut(cid) {
                if surface == Surface::Main {
                    common.size_type = SizeType::from_pixels(width, height);
                }
                let state = common.surface_mut(surface);
                state.width = width;
                state.height = height;
                if state.content_type != ContentType::Text && !fbfile.is_empty() {
                    state.rebind(fbfile)?;
                }
            }
        }

        match surface {
            Surface::Main => self.finish_op(cid, Op::SizeChanged, status, Event::SizeChanged(Surface::Main)),
            Surface::Secondary if status.is_ok() => self.emit_all(cid, Event::SizeChanged(Surface::Secondary)),
            Surface::Secondary => {}
        }
        Ok(())
    }

    fn on_period_changed(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if status.is_ok() {
            let period = packet.double(3)?;
            if let Some(common) = self.store.common_mut(cid) {
                common.period = period;
            }
        }
        self.finish_op(cid, Op::PeriodChanged, status, Event::PeriodChanged);
        Ok(())
    }

    fn on_group_changed(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if status.is_ok() {
            let cluster = packet.str(3)?;
            let category = packet.str(4)?;
            if let Some(common) = self.store.common_mut(cid) {
                common.cluster = cluster.to_owned();
                common.category = category.to_owned();
            }
        }
        self.finish_op(cid, Op::GroupChanged, status, Event::GroupChanged);
        Ok(())
    }

    fn on_pinup(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if status.is_ok() {
            let pinned_up = packet.int(3)? != 0;
            let content = packet.str(4)?;
            if let Some(common) = self.store.common_mut(cid) {
                common.is_pinned_up = pinned_up;
                common.content = content.to_owned();
            }
        }
        self.finish_op(cid, Op::Pinup, status, Event::PinupChanged);
        Ok(())
    }

    fn on_update_mode(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if status.is_ok() {
            let active = packet.int(3)? != 0;
            if let Some(common) = self.store.common_mut(cid) {
                common.is_active_update = active;
            }
        }
        self.finish_op(cid, Op::UpdateMode, status, Event::UpdateModeChanged);
        Ok(())
    }

    /// Access and key results only go to the waiting completion.
    fn on_status(&mut self, packet: &Packet, op: Op) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if let Some(common) = self.store.common_mut(cid) {
            common.request.release(op);
        }
        for h in self.store.handles_of(cid) {
            self.complete(h, op, status);
        }
        Ok(())
    }

    // ── Secondary surface ───────────────────────────────────────────────────

    fn on_gbar_created(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let fbfile = packet.str(2)?;
        let width = dimension(packet, 3)?;
        let height = dimension(packet, 4)?;
        let status = packet.int32(5).and_then(ViewerError::check);

        if status.is_ok() {
            if let Some(common) = self.store.common_mut(cid) {
                common.gbar_created = true;
                let state = &mut common.secondary;
                state.width = width;
                state.height = height;
                if state.content_type != ContentType::Text {
                    if let Err(e) = state.rebind(fbfile) {
                        log::warn!("[Viewer] Cannot bind secondary surface '{}': {}", fbfile, e);
                    }
                }
            }
        }
        self.finish_op(cid, Op::GbarCreated, status, Event::GbarCreated);
        Ok(())
    }

    fn on_gbar_destroyed(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let status = packet.int32(2).and_then(ViewerError::check);
        if status.is_ok() {
            if let Some(common) = self.store.common_mut(cid) {
                common.gbar_created = false;
                common.secondary.rebind("")?;
            }
        }
        self.finish_op(cid, Op::GbarDestroyed, status, Event::GbarDestroyed);
        Ok(())
    }

    fn on_close_gbar(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let reason = packet.int32(2)?;
        log::debug!("[Viewer] Provider asks to close the secondary surface ({})", reason);
        self.emit_all(cid, Event::RequestCloseGbar);
        Ok(())
    }

    // ── Extra buffers and metadata ──────────────────────────────────────────

    fn on_extra_buffer(&mut self, surface: Surface, packet: &Packet, created: bool) -> Result<()> {
        let cid = self.lookup(packet)?;
        let index = packet.int32(2)?;
        let resource = packet.int(3)?;
        let Some(common) = self.store.common_mut(cid) else {
            return Ok(());
        };
        let buffers = &mut common.surface_mut(surface).extra_buffers;
        buffers.retain(|&(i, _)| i != index);
        let event = if created {
            buffers.push((index, resource));
            Event::ExtraBufferCreated { surface, index }
        } else {
            Event::ExtraBufferDestroyed { surface, index }
        };
        self.emit_all(cid, event);
        Ok(())
    }

    fn on_extra_buffer_updated(&mut self, surface: Surface, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let index = packet.int32(2)?;
        self.deliver_update(cid, Event::ExtraBufferUpdated { surface, index });
        Ok(())
    }

    fn on_extra_info(&mut self, packet: &Packet) -> Result<()> {
        let cid = self.lookup(packet)?;
        let content = packet.str(2)?;
        let title = packet.str(3)?;
        let icon = packet.str(4)?;
        let name = packet.str(5)?;
        let priority = packet.double(6)?;
        if let Some(common) = self.store.common_mut(cid) {
            common.content = content.to_owned();
            common.title = title.to_owned();
            common.icon = icon.to_owned();
            common.name = name.to_owned();
            common.priority = priority;
        }
        self.emit_all(cid, Event::ExtraInfoUpdated);
        Ok(())
    }

    fn on_fault_package(&mut self, packet: &Packet) -> Result<()> {
        let pkgname = packet.str(0)?;
        let file = packet.str(1)?;
        let func = packet.str(2)?;
        log::warn!("[Viewer] Package {} deactivated ({} {})", pkgname, file, func);
        self.clear_package(pkgname);
        self.fire_fault(&Fault::Deactivated {
            pkgname: pkgname.to_owned(),
            file: file.to_owned(),
            func: func.to_owned(),
        });
        Ok(())
    }
}

fn dimension(packet: &Packet, idx: usize) -> Result<u32> {
    u32::try_from(packet.int(idx)?).map_err(|_| ViewerError::InvalidParameter)
}
