//! Package resolution and size metadata.
//!
//! The real metadata database lives outside the viewer. [`WidgetService`]
//! is the seam the viewer consults when an instance is added or resized;
//! [`DefaultService`] resolves every package to itself and uses the stock
//! size table.

use std::collections::HashSet;

/// Size class of a widget body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeType {
    /// 1×1 cell.
    S1x1,
    /// 2×1 cells.
    S2x1,
    /// 2×2 cells.
    S2x2,
    /// 4×1 cells.
    S4x1,
    /// 4×2 cells.
    S4x2,
    /// 4×3 cells.
    S4x3,
    /// 4×4 cells.
    S4x4,
    /// 4×5 cells.
    S4x5,
    /// 4×6 cells.
    S4x6,
    /// Easy-mode 1×1.
    Easy1x1,
    /// Easy-mode 3×1.
    Easy3x1,
    /// Easy-mode 3×3.
    Easy3x3,
    /// Full screen.
    Full,
}

impl SizeType {
    /// Every size class, in table order.
    pub const ALL: [SizeType; 13] = [
        Self::S1x1,
        Self::S2x1,
        Self::S2x2,
        Self::S4x1,
        Self::S4x2,
        Self::S4x3,
        Self::S4x4,
        Self::S4x5,
        Self::S4x6,
        Self::Easy1x1,
        Self::Easy3x1,
        Self::Easy3x3,
        Self::Full,
    ];

    /// Stock pixel size.
    #[must_use]
    pub fn default_pixels(self) -> (u32, u32) {
        match self {
            Self::S1x1 => (175, 175),
            Self::S2x1 => (354, 175),
            Self::S2x2 => (354, 354),
            Self::S4x1 => (712, 175),
            Self::S4x2 => (712, 354),
            Self::S4x3 => (712, 533),
            Self::S4x4 => (712, 712),
            Self::S4x5 => (712, 891),
            Self::S4x6 => (712, 1070),
            Self::Easy1x1 => (224, 215),
            Self::Easy3x1 => (680, 215),
            Self::Easy3x3 => (680, 653),
            Self::Full => (720, 1280),
        }
    }

    /// Size class of a pixel size in the stock table, if any.
    #[must_use]
    pub fn from_pixels(width: u32, height: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.default_pixels() == (width, height))
    }
}

/// Metadata lookups the viewer depends on.
pub trait WidgetService {
    /// Map a caller-facing package name to the provider's widget id.
    ///
    /// `None` means the package is unknown.
    fn resolve(&self, pkgname: &str) -> Option<String>;

    /// Whether the widget package is currently enabled.
    fn is_enabled(&self, _widget_id: &str) -> bool {
        true
    }

    /// Pixel size of a size class for this widget.
    fn size(&self, _widget_id: &str, size_type: SizeType) -> Option<(u32, u32)> {
        Some(size_type.default_pixels())
    }
}

/// Identity resolver with the stock size table.
///
/// Packages can be disabled explicitly, e.g. while they are being updated.
#[derive(Debug, Default, Clone)]
pub struct DefaultService {
    disabled: HashSet<String>,
}

impl DefaultService {
    /// Create a resolver with every package enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a widget id as disabled.
    pub fn disable(&mut self, widget_id: &str) {
        self.disabled.insert(widget_id.to_owned());
    }

    /// Re-enable a widget id.
    pub fn enable(&mut self, widget_id: &str) {
        self.disabled.remove(widget_id);
    }
}

impl WidgetService for DefaultService {
    fn resolve(&self, pkgname: &str) -> Option<String> {
        if pkgname.is_empty() {
            None
        } else {
            Some(pkgname.to_owned())
        }
    }

    fn is_enabled(&self, widget_id: &str) -> bool {
        !self.disabled.contains(widget_id)
    }
}
