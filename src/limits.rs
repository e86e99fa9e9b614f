// Hard limits enforced by the engine. Exceeding any of them yields
// `EngineError::LimitExceeded` instead of unbounded growth.

pub const MAX_OFFICES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_OFFICE: usize = 10_000;
pub const MAX_IMAGES_PER_OFFICE: usize = 32;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_IMAGE_PATH_LEN: usize = 1024;

/// Longest bookable stay, in inclusive days.
pub const MAX_STAY_DAYS: i64 = 365;

/// Widest `from_date..=to_date` window accepted by reservation listings.
pub const MAX_LISTING_WINDOW_DAYS: i64 = 3_660;
