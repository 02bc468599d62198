use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingId, BookingStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    UsernameTaken(String),
    PastBookingDate(NaiveDate),
    InvertedStay {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    /// The requested dates collide with an existing booking.
    Overlap(BookingId),
    ImageCount(usize),
    InvalidRating(u8),
    DuplicateReview,
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    NegativePrice,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Errors the caller can fix by changing the request body (HTTP 400).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::PastBookingDate(_)
                | EngineError::InvertedStay { .. }
                | EngineError::Overlap(_)
                | EngineError::ImageCount(_)
                | EngineError::InvalidRating(_)
                | EngineError::DuplicateReview
                | EngineError::InvalidTransition { .. }
                | EngineError::NegativePrice
                | EngineError::UsernameTaken(_)
                | EngineError::LimitExceeded(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UsernameTaken(name) => write!(f, "username already taken: {name}"),
            EngineError::PastBookingDate(date) => {
                write!(f, "booking date cannot be in the past: {date}")
            }
            EngineError::InvertedStay { check_in, check_out } => write!(
                f,
                "check_out_date must not precede check_in_date: {check_in} > {check_out}"
            ),
            EngineError::Overlap(id) => {
                write!(f, "property is already booked for those dates (booking {id})")
            }
            EngineError::ImageCount(n) => write!(
                f,
                "a property requires between 3 and 6 images, got {n}"
            ),
            EngineError::InvalidRating(r) => {
                write!(f, "rating must be between 1 and 5, got {r}")
            }
            EngineError::DuplicateReview => {
                write!(f, "user has already reviewed this property")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid booking transition: {from:?} -> {to:?}")
            }
            EngineError::NegativePrice => write!(f, "price must not be negative"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
