//! Hard limits and booking policy constants.

/// Maximum length of a reservation holder label.
pub const MAX_USER_LEN: usize = 128;

/// Maximum number of live reservations on the timeline.
pub const MAX_RESERVATIONS: usize = 10_000;

/// A stay may extend at most this many days past its start date
/// (3 calendar days total).
pub const MAX_STAY_DAYS: i64 = 2;

/// The booking horizon opens this many days after today.
pub const HORIZON_START_OFFSET_DAYS: u64 = 1;

/// The booking horizon closes this many days after today.
pub const HORIZON_END_OFFSET_DAYS: u64 = 30;
