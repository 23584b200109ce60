use std::time::Duration;

/// Delay between a lost connection and the next connect attempt.
///
/// Used both by the transport's automatic-reconnect policy and by the
/// manager's own reconnect timer after a full close.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Upper bound on how long `stop()` waits for the transport to close.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each listener's downstream message channel.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Slot carrying the "connected" marker.
pub const CONNECTED_SLOT: usize = 0;

/// Slot carrying the error payload.
pub const ERROR_SLOT: usize = 1;

/// Slot carrying the "disconnected" marker.
pub const DISCONNECTED_SLOT: usize = 2;

/// Index of the first per-subscription data slot.
pub const DATA_SLOT_OFFSET: usize = 3;

/// Payload placed in the connected slot.
pub const CONNECTED_MARKER: &str = "Connected";

/// Payload placed in the disconnected slot.
pub const DISCONNECTED_MARKER: &str = "Disconnected";

/// Standard port for `http://` endpoints.
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Standard port for `https://` endpoints.
pub const HTTPS_DEFAULT_PORT: u16 = 443;
