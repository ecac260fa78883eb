//! Hard input limits. Anything past these is rejected with `LimitExceeded`.

pub const MAX_SPACES: usize = 10_000;
pub const MAX_EQUIPMENT_KINDS: usize = 10_000;
pub const MAX_USERS: usize = 100_000;

/// Reservations kept per space, all dates and statuses included.
pub const MAX_RESERVATIONS_PER_SPACE: usize = 100_000;

pub const MAX_LINE_ITEMS: usize = 64;
pub const MAX_ITEM_QUANTITY: u32 = 10_000;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Weekly occurrences a single recurring request may expand into.
pub const MAX_RECURRING_OCCURRENCES: usize = 60;
