use crate::model::{Ms, DAY};

pub const MAX_TITLE_LEN: usize = 200;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not exceed one day.
pub const MAX_RESERVATION_DURATION_MS: Ms = DAY;

/// Re-evaluations after losing a compare-and-swap before giving up.
pub const MAX_CAS_RETRIES: usize = 3;

pub const MAX_PERMISSIONS_PER_ROLE: usize = 256;

/// Upper bound on one encoded WAL event. A larger length on disk is corruption.
pub const MAX_WAL_FRAME_LEN: usize = 1 << 20;
