//! Hard caps that keep a single hostile or buggy client from growing the
//! in-memory state or the WAL without bound.

pub const MAX_PROPERTIES: usize = 100_000;
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 10_000;
pub const MAX_REVIEWS_PER_PROPERTY: usize = 10_000;
pub const MAX_USERS: usize = 1_000_000;

pub const MIN_PROPERTY_IMAGES: usize = 3;
pub const MAX_PROPERTY_IMAGES: usize = 6;
pub const MAX_IMAGE_URL_LEN: usize = 2048;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_LOCATION_LEN: usize = 255;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_GUEST_NAME_LEN: usize = 255;
pub const MAX_GUEST_EMAIL_LEN: usize = 254;
pub const MAX_GUEST_PHONE_LEN: usize = 20;
pub const MAX_COMMENT_LEN: usize = 4096;
pub const MAX_AMENITY_CATEGORIES: usize = 32;
pub const MAX_AMENITIES_PER_CATEGORY: usize = 64;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub const DEFAULT_PAGE_SIZE: usize = 12;
pub const MAX_PAGE_SIZE: usize = 100;
