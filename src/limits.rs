//! Hard input limits. Anything beyond these is rejected rather than computed.

/// Shortest bookable session, in minutes.
pub const MIN_SESSION_MINUTES: u32 = 1;

/// Longest bookable session: one full day.
pub const MAX_SESSION_MINUTES: u32 = 24 * 60;

pub const MAX_PERIODS_PER_DAY: usize = 96;

pub const MAX_APPOINTMENTS_PER_QUERY: usize = 10_000;

/// Upper bound for the calendar-strip helper.
pub const MAX_BOOKABLE_DATES_SPAN: u32 = 366;

pub const MAX_WAITLIST_ENTRIES: usize = 100_000;

pub const ACCEPTANCE_TOKEN_LEN: usize = 48;
