//! Crate-wide constants.
//!
//! Timing values for the command queue and session, plus protocol limits.
//! Grouped by domain so they are easy to find.

use std::time::Duration;

// ============================================================================
// Command queue
// ============================================================================

/// Interval between two queue drain steps.
///
/// The queue sends one command per step rather than flushing in bursts,
/// which throttles provider load and keeps requests ordered.
pub const RPC_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Send attempts allowed for an acknowledged command before it fails.
pub const RPC_DEFAULT_TTL: u32 = 3;

// ============================================================================
// Session
// ============================================================================

/// Fallback delay between reconnection attempts after a disconnect.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout for synchronous requests (handshake release).
pub const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default socket path of the provider daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/.widget.service";

// ============================================================================
// Wire limits
// ============================================================================

/// Maximum frame payload size (4 MB).
pub const MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

/// Read buffer size used by the transport reader thread.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// Instances
// ============================================================================

/// Update period meaning "let the provider decide".
pub const DEFAULT_PERIOD: f64 = -1.0;

/// Sentinel content string used when the caller passes none.
pub const DEFAULT_CONTENT: &str = "";

/// Cluster used when the caller passes none.
pub const DEFAULT_CLUSTER: &str = "user,created";

/// Category used when the caller passes none.
pub const DEFAULT_CATEGORY: &str = "default";
