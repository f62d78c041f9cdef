//! Command naming for the two protocol generations.
//!
//! The "livebox" and "widget" generations speak the same protocol; they only
//! name the two surfaces differently (`lb`/`pd` versus `widget`/`gbar`).
//! Everything that builds or matches a surface-specific command name goes
//! through [`Generation`], so the rest of the crate is generation agnostic.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Protocol naming generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    /// Legacy naming: `lb_*` main surface, `pd_*` secondary surface.
    Livebox,
    /// Current naming: `widget_*` main surface, `gbar_*` secondary surface.
    Widget,
}

impl FromStr for Generation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "livebox" | "lb" => Ok(Self::Livebox),
            "widget" => Ok(Self::Widget),
            _ => Err(()),
        }
    }
}

/// One of the two drawable surfaces of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    /// The widget body shown on the homescreen.
    Main,
    /// The glance bar / progressive disclosure popup.
    Secondary,
}

/// Inbound push command, decoded from its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    /// Instance creation confirmed (or announced) by the provider.
    Created,
    /// Instance deleted by the provider.
    Deleted,
    /// New content is available on a surface.
    Updated(Surface),
    /// Provider starts a multi-frame update.
    UpdateBegin(Surface),
    /// Provider finished a multi-frame update.
    UpdateEnd(Surface),
    /// A surface changed size.
    SizeChanged,
    /// Update period changed.
    PeriodChanged,
    /// Cluster/category changed.
    GroupChanged,
    /// Pin-up state changed.
    Pinup,
    /// Active/passive update mode changed.
    UpdateMode,
    /// Result of an accessibility event.
    AccessStatus,
    /// Result of a key event.
    KeyStatus,
    /// Secondary surface was created.
    SecondaryCreated,
    /// Secondary surface was destroyed.
    SecondaryDestroyed,
    /// Provider wants the secondary surface closed.
    CloseSecondary,
    /// An extra buffer was attached to a surface.
    ExtraBufferCreated(Surface),
    /// An extra buffer was detached from a surface.
    ExtraBufferDestroyed(Surface),
    /// An extra buffer has new content.
    ExtraBufferUpdated(Surface),
    /// Content/title/icon metadata changed.
    ExtraInfo,
    /// A provider package crashed or was deactivated.
    FaultPackage,
}

/// Pointer event kinds forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    /// Button pressed.
    Down,
    /// Button released.
    Up,
    /// Pointer moved.
    Move,
    /// Pointer entered the surface.
    Enter,
    /// Pointer left the surface.
    Leave,
}

impl MouseEvent {
    fn base(self) -> &'static str {
        match self {
            Self::Down => "mouse_down",
            Self::Up => "mouse_up",
            Self::Move => "mouse_move",
            Self::Enter => "mouse_enter",
            Self::Leave => "mouse_leave",
        }
    }
}

/// Accessibility actions forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    /// Highlight the object under the point.
    Highlight,
    /// Move highlight to the previous object.
    HighlightPrev,
    /// Move highlight to the next object.
    HighlightNext,
    /// Remove the highlight.
    Unhighlight,
    /// Activate the highlighted object.
    Activate,
    /// Perform the default action.
    Action,
    /// Scroll the highlighted object.
    Scroll,
    /// Change the value of the highlighted object.
    ValueChange,
    /// Go back.
    Back,
    /// Hover over an object.
    Over,
    /// Read the highlighted object.
    Read,
    /// Enable accessibility on the instance.
    Enable,
    /// Disable accessibility on the instance.
    Disable,
}

impl AccessAction {
    fn base(self) -> &'static str {
        match self {
            Self::Highlight => "access_hl",
            Self::HighlightPrev => "access_hl_prev",
            Self::HighlightNext => "access_hl_next",
            Self::Unhighlight => "access_unhighlight",
            Self::Activate => "access_activate",
            Self::Action => "access_action",
            Self::Scroll => "access_scroll",
            Self::ValueChange => "access_value_change",
            Self::Back => "access_back",
            Self::Over => "access_over",
            Self::Read => "access_read",
            Self::Enable => "access_enable",
            Self::Disable => "access_disable",
        }
    }
}

/// Key event kinds forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Key pressed.
    Down,
    /// Key released.
    Up,
    /// Surface gained key focus.
    FocusIn,
    /// Surface lost key focus.
    FocusOut,
}

impl KeyAction {
    fn base(self) -> &'static str {
        match self {
            Self::Down => "key_down",
            Self::Up => "key_up",
            Self::FocusIn => "key_focus_in",
            Self::FocusOut => "key_focus_out",
        }
    }
}

/// How a delete request should be treated by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteType {
    /// The user removed the widget for good.
    #[default]
    Permanently,
    /// The viewer is going away; the provider may keep state.
    Temporary,
}

impl DeleteType {
    /// Wire value.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Permanently => 0,
            Self::Temporary => 1,
        }
    }
}

impl Generation {
    /// Command prefix of a surface.
    #[must_use]
    pub fn prefix(self, surface: Surface) -> &'static str {
        match (self, surface) {
            (Self::Livebox, Surface::Main) => "lb",
            (Self::Livebox, Surface::Secondary) => "pd",
            (Self::Widget, Surface::Main) => "widget",
            (Self::Widget, Surface::Secondary) => "gbar",
        }
    }

    /// `"{prefix}_{base}"` for a surface.
    #[must_use]
    pub fn surface_command(self, surface: Surface, base: &str) -> String {
        format!("{}_{}", self.prefix(surface), base)
    }

    /// Request creating the secondary surface.
    #[must_use]
    pub fn create_secondary(self) -> String {
        format!("create_{}", self.prefix(Surface::Secondary))
    }

    /// Request destroying the secondary surface.
    #[must_use]
    pub fn destroy_secondary(self) -> String {
        format!("destroy_{}", self.prefix(Surface::Secondary))
    }

    /// Secondary surface move notification.
    #[must_use]
    pub fn move_secondary(self) -> String {
        self.surface_command(Surface::Secondary, "move")
    }

    /// Mouse event notification for a surface.
    #[must_use]
    pub fn mouse(self, surface: Surface, event: MouseEvent) -> String {
        self.surface_command(surface, event.base())
    }

    /// Accessibility request (main surface).
    #[must_use]
    pub fn access(self, action: AccessAction) -> String {
        self.surface_command(Surface::Main, action.base())
    }

    /// Key request (main surface).
    #[must_use]
    pub fn key(self, action: KeyAction) -> String {
        self.surface_command(Surface::Main, action.base())
    }

    /// Pixmap acquire request for a surface.
    #[must_use]
    pub fn acquire_pixmap(self, surface: Surface) -> String {
        self.surface_command(surface, "acquire_pixmap")
    }

    /// Pixmap release notification for a surface.
    #[must_use]
    pub fn release_pixmap(self, surface: Surface) -> String {
        self.surface_command(surface, "release_pixmap")
    }

    /// Decode an inbound command name.
    ///
    /// Returns `None` for names this generation does not know.
    #[must_use]
    pub fn parse_inbound(self, name: &str) -> Option<InboundCommand> {
        let generic = match name {
            "created" => Some(InboundCommand::Created),
            "deleted" => Some(InboundCommand::Deleted),
            "size_changed" => Some(InboundCommand::SizeChanged),
            "period_changed" => Some(InboundCommand::PeriodChanged),
            "group_changed" => Some(InboundCommand::GroupChanged),
            "pinup" => Some(InboundCommand::Pinup),
            "update_mode" => Some(InboundCommand::UpdateMode),
            "access_status" => Some(InboundCommand::AccessStatus),
            "key_status" => Some(InboundCommand::KeyStatus),
            "extra_info" => Some(InboundCommand::ExtraInfo),
            "fault_package" => Some(InboundCommand::FaultPackage),
            _ => None,
        };
        if generic.is_some() {
            return generic;
        }

        let secondary = self.prefix(Surface::Secondary);
        if name.strip_prefix("close_") == Some(secondary) {
            return Some(InboundCommand::CloseSecondary);
        }

        for surface in [Surface::Main, Surface::Secondary] {
            let Some(base) = name
                .strip_prefix(self.prefix(surface))
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            let cmd = match (surface, base) {
                (_, "updated") => InboundCommand::Updated(surface),
                (_, "update_begin") => InboundCommand::UpdateBegin(surface),
                (_, "update_end") => InboundCommand::UpdateEnd(surface),
                (_, "create_extra_buffer") => InboundCommand::ExtraBufferCreated(surface),
                (_, "delete_extra_buffer") => InboundCommand::ExtraBufferDestroyed(surface),
                (_, "extra_buffer_updated") => InboundCommand::ExtraBufferUpdated(surface),
                (Surface::Secondary, "created") => InboundCommand::SecondaryCreated,
                (Surface::Secondary, "destroyed") => InboundCommand::SecondaryDestroyed,
                _ => return None,
            };
            return Some(cmd);
        }
        None
    }
}
