//! Input bounds enforced at the engine surface.

use crate::model::Ms;

/// Earliest accepted instant (unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest accepted instant (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest allowed service / booking duration.
pub const MAX_BOOKING_DURATION_MIN: u32 = 24 * 60;

pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;
pub const MAX_RULES_PER_PROVIDER: usize = 64;
pub const MAX_TIME_OFF_PER_PROVIDER: usize = 1_024;
pub const MAX_SERVICES_PER_PROVIDER: usize = 256;

/// Widest availability query window, in days.
pub const MAX_QUERY_DAYS: u32 = 92;
pub const MIN_SLOT_GRANULARITY_MIN: u32 = 5;
pub const MAX_SLOT_GRANULARITY_MIN: u32 = 8 * 60;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
