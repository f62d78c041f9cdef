//! Read access to instance state and host-side attachments.
//!
//! Getters work on any handle that has not been destroyed, including one
//! whose delete is in flight. Provider-assigned values (the instance id)
//! return [`ViewerError::Fault`] until the instance is confirmed.

use std::any::Any;

use super::Viewer;
use crate::desc::ScriptOperators;
use crate::error::{Result, ViewerError};
use crate::fb::Framebuffer;
use crate::instance::{Common, ContentType, InstanceState, Visibility, WidgetHandle};
use crate::protocol::Surface;
use crate::service::SizeType;

impl Viewer {
    fn common_ref(&self, h: WidgetHandle) -> Result<&Common> {
        self.store
            .resolve(h)
            .map(|(_, common)| common)
            .ok_or(ViewerError::InvalidParameter)
    }

    fn framebuffer_mut(&mut self, h: WidgetHandle, surface: Surface) -> Result<&mut Framebuffer> {
        let cid = self
            .store
            .handle(h)
            .filter(|handle| handle.state != InstanceState::Destroyed)
            .and_then(|handle| handle.common)
            .ok_or(ViewerError::InvalidParameter)?;
        self.store
            .common_mut(cid)
            .ok_or(ViewerError::InvalidParameter)?
            .surface_mut(surface)
            .fb
            .as_mut()
            .ok_or(ViewerError::Fault)
    }

    /// Whether `h` still refers to a live or deleting instance.
    #[must_use]
    pub fn is_valid(&self, h: WidgetHandle) -> bool {
        self.store.resolve(h).is_some()
    }

    /// Every handle not yet destroyed.
    #[must_use]
    pub fn handles(&self) -> Vec<WidgetHandle> {
        self.store
            .live_handles()
            .into_iter()
            .filter(|&h| self.store.resolve(h).is_some())
            .collect()
    }

    /// Lifecycle state of a handle.
    pub fn state(&self, h: WidgetHandle) -> Result<InstanceState> {
        self.store
            .handle(h)
            .map(|handle| handle.state)
            .ok_or(ViewerError::InvalidParameter)
    }

    /// Package (widget id) of the instance.
    pub fn pkgname(&self, h: WidgetHandle) -> Result<&str> {
        Ok(&self.common_ref(h)?.pkgname)
    }

    /// Provider-assigned instance id.
    ///
    /// # Errors
    ///
    /// [`ViewerError::Fault`] until the provider confirmed the instance.
    pub fn id(&self, h: WidgetHandle) -> Result<&str> {
        self.common_ref(h)?.id.as_deref().ok_or(ViewerError::Fault)
    }

    /// Content string the instance was created with or last reported.
    pub fn content(&self, h: WidgetHandle) -> Result<&str> {
        Ok(&self.common_ref(h)?.content)
    }

    /// Title reported by the provider.
    pub fn title(&self, h: WidgetHandle) -> Result<&str> {
        Ok(&self.common_ref(h)?.title)
    }

    /// Icon path reported by the provider.
    pub fn icon(&self, h: WidgetHandle) -> Result<&str> {
        Ok(&self.common_ref(h)?.icon)
    }

    /// Display name reported by the provider.
    pub fn name(&self, h: WidgetHandle) -> Result<&str> {
        Ok(&self.common_ref(h)?.name)
    }

    /// Cluster and category.
    pub fn group(&self, h: WidgetHandle) -> Result<(&str, &str)> {
        let common = self.common_ref(h)?;
        Ok((&common.cluster, &common.category))
    }

    /// Update period in seconds.
    pub fn period(&self, h: WidgetHandle) -> Result<f64> {
        Ok(self.common_ref(h)?.period)
    }

    /// Provider-assigned priority of the last update.
    pub fn priority(&self, h: WidgetHandle) -> Result<f64> {
        Ok(self.common_ref(h)?.priority)
    }

    /// Pixel size of the main surface.
    pub fn size(&self, h: WidgetHandle) -> Result<(u32, u32)> {
        let common = self.common_ref(h)?;
        Ok((common.main.width, common.main.height))
    }

    /// Size class of the main surface.
    ///
    /// # Errors
    ///
    /// [`ViewerError::InvalidParameter`] when the pixel size matches no class.
    pub fn size_type(&self, h: WidgetHandle) -> Result<SizeType> {
        self.common_ref(h)?.size_type.ok_or(ViewerError::InvalidParameter)
    }

    /// Pixel size of the secondary surface.
    pub fn gbar_size(&self, h: WidgetHandle) -> Result<(u32, u32)> {
        let common = self.common_ref(h)?;
        Ok((common.secondary.width, common.secondary.height))
    }

    /// How a surface's content is delivered.
    pub fn content_type(&self, h: WidgetHandle, surface: Surface) -> Result<ContentType> {
        Ok(self.common_ref(h)?.surface(surface).content_type)
    }

    /// Id of the framebuffer bound to a surface, if any.
    pub fn fb_id(&self, h: WidgetHandle, surface: Surface) -> Result<Option<&str>> {
        Ok(self.common_ref(h)?.surface(surface).fb.as_ref().map(Framebuffer::id))
    }

    /// Extra buffers attached to a surface, as `(index, resource)` pairs.
    pub fn extra_buffers(&self, h: WidgetHandle, surface: Surface) -> Result<&[(i32, i64)]> {
        Ok(&self.common_ref(h)?.surface(surface).extra_buffers)
    }

    /// Whether the secondary surface is open.
    pub fn is_gbar_created(&self, h: WidgetHandle) -> Result<bool> {
        Ok(self.common_ref(h)?.gbar_created)
    }

    /// Whether the content can be pinned up.
    pub fn pinup_supported(&self, h: WidgetHandle) -> Result<bool> {
        Ok(self.common_ref(h)?.pinup_supported)
    }

    /// Whether the content is pinned up.
    pub fn is_pinned_up(&self, h: WidgetHandle) -> Result<bool> {
        Ok(self.common_ref(h)?.is_pinned_up)
    }

    /// Whether the provider pushes updates on its own.
    pub fn is_active_update(&self, h: WidgetHandle) -> Result<bool> {
        Ok(self.common_ref(h)?.is_active_update)
    }

    /// Whether the instance was added by this client rather than announced
    /// by the provider.
    pub fn is_user(&self, h: WidgetHandle) -> Result<bool> {
        self.store
            .resolve(h)
            .map(|(handle, _)| handle.is_user)
            .ok_or(ViewerError::InvalidParameter)
    }

    /// This subscriber's own visibility.
    pub fn visibility(&self, h: WidgetHandle) -> Result<Visibility> {
        self.store
            .resolve(h)
            .map(|(handle, _)| handle.visible)
            .ok_or(ViewerError::InvalidParameter)
    }

    /// Updates held back while this subscriber is paused.
    pub fn paused_updates(&self, h: WidgetHandle) -> Result<u32> {
        self.store
            .resolve(h)
            .map(|(handle, _)| handle.paused_updating)
            .ok_or(ViewerError::InvalidParameter)
    }

    /// Handles sharing this handle's instance, itself included.
    pub fn subscriber_count(&self, h: WidgetHandle) -> Result<usize> {
        Ok(self.common_ref(h)?.refcnt)
    }

    // ── Framebuffers ────────────────────────────────────────────────────────

    /// Take a reference on a surface's buffer.
    ///
    /// # Errors
    ///
    /// `Fault` when nothing is bound, `NotSupported` for pixmaps.
    pub fn acquire_buffer(&mut self, h: WidgetHandle, surface: Surface) -> Result<u32> {
        self.framebuffer_mut(h, surface)?.acquire_buffer()
    }

    /// Drop a reference taken with [`acquire_buffer`](Self::acquire_buffer).
    pub fn release_buffer(&mut self, h: WidgetHandle, surface: Surface) -> Result<u32> {
        self.framebuffer_mut(h, surface)?.release_buffer()
    }

    /// Buffer references held on a surface.
    pub fn buffer_refcnt(&self, h: WidgetHandle, surface: Surface) -> Result<u32> {
        self.common_ref(h)?
            .surface(surface)
            .fb
            .as_ref()
            .map(Framebuffer::buffer_refcnt)
            .ok_or(ViewerError::Fault)
    }

    /// Run `f` over a surface's local pixel copy.
    pub fn with_pixels<R>(&self, h: WidgetHandle, surface: Surface, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let fb = self.common_ref(h)?.surface(surface).fb.as_ref().ok_or(ViewerError::Fault)?;
        Ok(fb.with_pixels(f))
    }

    /// Pull the latest pixels of a surface, for hosts running with
    /// manual sync.
    pub fn sync_buffer(&self, h: WidgetHandle, surface: Surface) -> Result<()> {
        self.common_ref(h)?
            .surface(surface)
            .fb
            .as_ref()
            .ok_or(ViewerError::Fault)?
            .sync()
    }

    // ── Host attachments ────────────────────────────────────────────────────

    /// Attach host data to a handle, replacing any previous value.
    pub fn set_data<T: Any>(&mut self, h: WidgetHandle, data: T) -> Result<()> {
        if self.store.live(h).is_none() {
            return Err(ViewerError::InvalidParameter);
        }
        if let Some(handle) = self.store.handle_mut(h) {
            handle.data = Some(Box::new(data));
        }
        Ok(())
    }

    /// Host data of type `T`, if attached.
    #[must_use]
    pub fn data<T: Any>(&self, h: WidgetHandle) -> Option<&T> {
        self.store
            .resolve(h)
            .and_then(|(handle, _)| handle.data.as_ref())
            .and_then(|data| data.downcast_ref())
    }

    /// Detach host data of type `T`.
    pub fn take_data<T: Any>(&mut self, h: WidgetHandle) -> Option<T> {
        let handle = self.store.handle_mut(h)?;
        if !handle.data.as_ref().is_some_and(|data| data.is::<T>()) {
            return None;
        }
        handle.data.take()?.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Register the operators that render a text-type surface for this
    /// subscriber.
    pub fn set_script_operators(
        &mut self,
        h: WidgetHandle,
        surface: Surface,
        ops: Box<dyn ScriptOperators>,
    ) -> Result<()> {
        if self.store.live(h).is_none() {
            return Err(ViewerError::InvalidParameter);
        }
        if let Some(handle) = self.store.handle_mut(h) {
            *handle.ops_slot(surface) = Some(ops);
        }
        Ok(())
    }
}
