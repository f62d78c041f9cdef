//! Framebuffer binding for instance surfaces.
//!
//! The provider renders into a canvas it owns and tells the viewer where to
//! find it with an id such as `file:///run/widget/abc.png`, `shm://1234`
//! or `pixmap://77`. A [`Framebuffer`] binds to that canvas, keeps a local
//! copy of the pixels for file backings, and counts buffer acquisitions by
//! the host. Rebinding is always destroy-then-create; an existing binding is
//! never repointed.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, ViewerError};

/// Backing storage of a framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FbBacking {
    /// A file the provider rewrites on every frame.
    File(PathBuf),
    /// A shared memory segment identified by key.
    Shm(u64),
    /// A window-system pixmap.
    Pixmap(u32),
}

/// Kind of a framebuffer backing, without its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FbType {
    /// File backed.
    File,
    /// Shared memory backed.
    Shm,
    /// Pixmap backed.
    Pixmap,
}

/// Binding to a provider canvas.
#[derive(Debug)]
pub struct Framebuffer {
    id: String,
    backing: FbBacking,
    width: u32,
    height: u32,
    pixels: Mutex<Vec<u8>>,
    refcnt: u32,
}

impl Framebuffer {
    /// Bind to the canvas named by `id`.
    ///
    /// # Errors
    ///
    /// [`ViewerError::InvalidParameter`] when the id has an unknown scheme
    /// or a malformed address.
    pub fn create(id: &str, width: u32, height: u32) -> Result<Self> {
        let backing = parse_id(id).ok_or_else(|| {
            log::warn!("[Fb] Unsupported framebuffer id '{}'", id);
            ViewerError::InvalidParameter
        })?;
        log::debug!("[Fb] Bind {} ({}x{})", id, width, height);
        Ok(Self {
            id: id.to_owned(),
            backing,
            width,
            height,
            pixels: Mutex::new(Vec::new()),
            refcnt: 0,
        })
    }

    /// Release the binding. Outstanding buffer acquisitions are dropped.
    pub fn destroy(self) {
        if self.refcnt > 0 {
            log::warn!("[Fb] Destroying {} with {} buffer refs", self.id, self.refcnt);
        }
        log::debug!("[Fb] Unbind {}", self.id);
    }

    /// Canvas id as announced by the provider.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Backing kind.
    #[must_use]
    pub fn fb_type(&self) -> FbType {
        match self.backing {
            FbBacking::File(_) => FbType::File,
            FbBacking::Shm(_) => FbType::Shm,
            FbBacking::Pixmap(_) => FbType::Pixmap,
        }
    }

    /// Backing address.
    #[must_use]
    pub fn backing(&self) -> &FbBacking {
        &self.backing
    }

    /// Pixel size of the canvas.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixmap id, when pixmap backed.
    #[must_use]
    pub fn pixmap(&self) -> Option<u32> {
        match self.backing {
            FbBacking::Pixmap(id) => Some(id),
            _ => None,
        }
    }

    /// Pull the latest pixels from the backing.
    ///
    /// File backings are copied under the pixel lock. Shared memory is
    /// mapped by the host, so only the lock is taken to order the update
    /// against readers. Pixmaps rely on the window system.
    pub fn sync(&self) -> Result<()> {
        match &self.backing {
            FbBacking::File(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    log::warn!("[Fb] Sync {} failed: {}", path.display(), e);
                    ViewerError::IoError
                })?;
                *self.lock() = data;
                Ok(())
            }
            FbBacking::Shm(_) => {
                drop(self.lock());
                Ok(())
            }
            FbBacking::Pixmap(_) => Ok(()),
        }
    }

    /// Take a buffer reference. Returns the new reference count.
    ///
    /// # Errors
    ///
    /// [`ViewerError::NotSupported`] for pixmap backings, which are acquired
    /// through the provider instead.
    pub fn acquire_buffer(&mut self) -> Result<u32> {
        if self.fb_type() == FbType::Pixmap {
            return Err(ViewerError::NotSupported);
        }
        self.refcnt += 1;
        Ok(self.refcnt)
    }

    /// Drop a buffer reference. Returns the remaining count.
    pub fn release_buffer(&mut self) -> Result<u32> {
        if self.refcnt == 0 {
            return Err(ViewerError::InvalidParameter);
        }
        self.refcnt -= 1;
        Ok(self.refcnt)
    }

    /// Current buffer reference count.
    #[must_use]
    pub fn buffer_refcnt(&self) -> u32 {
        self.refcnt
    }

    /// Run `f` over the local pixel copy while holding the pixel lock.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.pixels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_id(id: &str) -> Option<FbBacking> {
    if let Some(path) = id.strip_prefix("file://") {
        if path.is_empty() {
            return None;
        }
        return Some(FbBacking::File(PathBuf::from(path)));
    }
    if let Some(key) = id.strip_prefix("shm://") {
        return key.parse().ok().map(FbBacking::Shm);
    }
    if let Some(pixmap) = id.strip_prefix("pixmap://") {
        return pixmap.parse().ok().map(FbBacking::Pixmap);
    }
    None
}
