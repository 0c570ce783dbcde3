/// Bookings may not start further ahead than this by default.
pub const DEFAULT_MAX_ADVANCE_DAYS: i64 = 365;

/// Default look-ahead for unavailable-dates queries.
pub const DEFAULT_UNAVAILABLE_HORIZON_DAYS: i64 = 365;

/// Widest window an unavailable-dates query may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Longest single reservation.
pub const MAX_RESERVATION_DAYS: i64 = 2 * 366;

/// Positions kept per reservation; older samples are dropped first.
pub const MAX_POSITIONS_PER_RESERVATION: usize = 1000;

/// Positions returned per reservation by the tracking view.
pub const TRACKING_POSITIONS: usize = 20;

pub const MAX_TELEMETRY_PAYLOAD_BYTES: usize = 4096;

pub const MAX_DEVICE_ID_LEN: usize = 128;

pub const MAX_USER_ID_LEN: usize = 128;

/// Per-topic buffer in the local broker.
pub const BROKER_CHANNEL_CAPACITY: usize = 1024;

/// Producer → gateway dispatcher queue.
pub const FANOUT_CHANNEL_CAPACITY: usize = 4096;

/// Per-session outbound queue; a full queue drops the event.
pub const SESSION_CHANNEL_CAPACITY: usize = 256;

pub const MAX_ROOMS_PER_SESSION: usize = 64;

pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Distinct client ids remembered for reconnection counting.
pub const MAX_TRACKED_CLIENTS: usize = 100_000;

/// Devices the liveness tracker remembers; the stalest is evicted first.
pub const MAX_TRACKED_DEVICES: usize = 10_000;

/// A device silent for this many liveness timeouts is forgotten and no
/// longer alerted on.
pub const LIVENESS_FORGET_AFTER_TIMEOUTS: i32 = 20;
