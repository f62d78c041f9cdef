//! Configuration loading and runtime options.
//!
//! [`Config`] is read once at startup from
//! `<config dir>/widget-viewer/config.json` with environment overrides.
//! [`Options`] holds the few process-wide switches the host may flip at
//! runtime through [`crate::Viewer::set_option`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use std::fs;

use crate::constants::{DEFAULT_SOCKET_PATH, RECONNECT_INTERVAL, RPC_DEFAULT_TTL, RPC_DRAIN_INTERVAL};
use crate::protocol::Generation;

/// Configuration for a viewer session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Path of the provider's Unix socket.
    pub socket_path: PathBuf,
    /// Naming generation spoken on the wire.
    pub generation: Generation,
    /// Reuse an already rendered instance for identical add requests.
    pub shared_content: bool,
    /// Leave framebuffer synchronisation to the host.
    pub manual_sync: bool,
    /// Skip frames that arrive while a resize is in flight.
    pub frame_drop_for_resize: bool,
    /// Send attempts for acknowledged commands.
    pub rpc_ttl: u32,
    /// Queue drain interval in milliseconds.
    pub drain_interval_ms: u64,
    /// Fallback reconnection interval in milliseconds.
    pub reconnect_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            generation: Generation::Widget,
            shared_content: false,
            manual_sync: false,
            frame_drop_for_resize: true,
            rpc_ttl: RPC_DEFAULT_TTL,
            drain_interval_ms: RPC_DRAIN_INTERVAL.as_millis() as u64,
            reconnect_interval_ms: RECONNECT_INTERVAL.as_millis() as u64,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `WIDGET_VIEWER_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("WIDGET_VIEWER_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("widget-viewer"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::debug!("[Config] {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit file without env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parse config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("WIDGET_VIEWER_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }

        if let Ok(generation) = std::env::var("WIDGET_VIEWER_GENERATION") {
            match generation.parse() {
                Ok(g) => self.generation = g,
                Err(()) => log::warn!("[Config] Ignoring unknown generation '{}'", generation),
            }
        }

        if let Some(v) = env_flag("WIDGET_VIEWER_SHARED_CONTENT") {
            self.shared_content = v;
        }
        if let Some(v) = env_flag("WIDGET_VIEWER_MANUAL_SYNC") {
            self.manual_sync = v;
        }
        if let Some(v) = env_flag("WIDGET_VIEWER_FRAME_DROP_FOR_RESIZE") {
            self.frame_drop_for_resize = v;
        }
    }

    /// Queue drain interval.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Fallback reconnection interval.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Initial runtime options derived from this configuration.
    #[must_use]
    pub fn options(&self) -> Options {
        Options {
            manual_sync: self.manual_sync,
            frame_drop_for_resize: self.frame_drop_for_resize,
            shared_content: self.shared_content,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("[Config] Ignoring non-boolean {}={}", name, value);
            None
        }
    }
}

/// Runtime option selector for [`crate::Viewer::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewerOption {
    /// Host syncs framebuffers itself.
    ManualSync,
    /// Drop update frames while a resize is pending.
    FrameDropForResize,
    /// Share rendered instances between identical adds.
    SharedContent,
}

/// Process-wide switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    /// See [`ViewerOption::ManualSync`].
    pub manual_sync: bool,
    /// See [`ViewerOption::FrameDropForResize`].
    pub frame_drop_for_resize: bool,
    /// See [`ViewerOption::SharedContent`].
    pub shared_content: bool,
}

impl Options {
    /// Read one option.
    #[must_use]
    pub fn get(&self, option: ViewerOption) -> bool {
        match option {
            ViewerOption::ManualSync => self.manual_sync,
            ViewerOption::FrameDropForResize => self.frame_drop_for_resize,
            ViewerOption::SharedContent => self.shared_content,
        }
    }

    /// Write one option.
    pub fn set(&mut self, option: ViewerOption, value: bool) {
        match option {
            ViewerOption::ManualSync => self.manual_sync = value,
            ViewerOption::FrameDropForResize => self.frame_drop_for_resize = value,
            ViewerOption::SharedContent => self.shared_content = value,
        }
    }
}
