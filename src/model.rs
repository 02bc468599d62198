use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type UserId = Ulid;
pub type PropertyId = Ulid;
pub type BookingId = Ulid;
pub type ReviewId = Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Closed interval `[check_in, check_out]` of nights — overlap is inclusive
/// on both ends: a stay ending on a date conflicts with one starting that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn is_inverted(&self) -> bool {
        self.check_in > self.check_out
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in <= other.check_out && other.check_in <= self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Rental,
    Airbnb,
    Office,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Month,
    Night,
    Sale,
}

/// A rentable listing. Images are opaque URLs; the count invariant
/// (3 to 6) is enforced by the engine before any write is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub title: String,
    pub location: String,
    pub county: Option<String>,
    pub town: Option<String>,
    // String-encoded so the event serializer (bincode, non-self-describing)
    // can round-trip it; Decimal's default Deserialize needs deserialize_any.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub price_type: PriceType,
    pub kind: PropertyKind,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    /// Floor area in square feet.
    pub area: Option<u32>,
    pub rental_type: Option<String>,
    pub images: Vec<String>,
    /// Amenity category → facility names, e.g. "security" → ["cctv", "guard"].
    pub amenities: BTreeMap<String, Vec<String>>,
    pub featured: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Admin-driven lifecycle: only a pending booking moves, and only to
    /// confirmed or cancelled. Completed exists as a terminal value but no
    /// transition produces it here.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(self, BookingStatus::Pending)
            && matches!(next, BookingStatus::Confirmed | BookingStatus::Cancelled)
    }

    pub fn is_cancelled(self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: String,
    /// The requested date; a booking may carry this alone ("soft-booked")
    /// without blocking other bookings.
    pub booking_date: NaiveDate,
    pub check_in_date: Option<NaiveDate>,
    pub check_out_date: Option<NaiveDate>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// The concrete reservation interval, present only when both dates are set.
    pub fn stay(&self) -> Option<StayRange> {
        match (self.check_in_date, self.check_out_date) {
            (Some(check_in), Some(check_out)) => Some(StayRange::new(check_in, check_out)),
            _ => None,
        }
    }

    /// Whether this booking occupies the property for the given range.
    /// Cancelled and date-less bookings never block.
    pub fn blocks(&self, range: &StayRange) -> bool {
        if self.status.is_cancelled() {
            return false;
        }
        self.stay().is_some_and(|stay| stay.overlaps(range))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-property state: the listing plus everything that hangs off it.
/// Deleting the property drops the whole struct, which is the cascade.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub listing: Property,
    pub bookings: Vec<Booking>,
    pub reviews: Vec<Review>,
}

impl PropertyState {
    pub fn new(listing: Property) -> Self {
        Self {
            listing,
            bookings: Vec::new(),
            reviews: Vec::new(),
        }
    }

    /// The availability query: bookings whose interval intersects `range`
    /// inclusively, skipping cancelled bookings, date-less bookings, and
    /// (for updates) the booking identified by `exclude`. Order unspecified.
    pub fn overlapping<'a>(
        &'a self,
        range: &'a StayRange,
        exclude: Option<BookingId>,
    ) -> impl Iterator<Item = &'a Booking> {
        self.bookings
            .iter()
            .filter(move |b| Some(b.id) != exclude && b.blocks(range))
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn has_review_by(&self, user_id: UserId) -> bool {
        self.reviews.iter().any(|r| r.user_id == user_id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered { user: User },
    PropertyCreated { property: Property },
    PropertyUpdated { property: Property },
    PropertyDeleted { id: PropertyId },
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    BookingStatusChanged {
        id: BookingId,
        property_id: PropertyId,
        status: BookingStatus,
    },
    BookingDeleted {
        id: BookingId,
        property_id: PropertyId,
    },
    ReviewCreated { review: Review },
}

impl Event {
    /// The property this event belongs to, for events applied under a
    /// property lock. User and property create/delete events are handled
    /// at the map level instead.
    pub fn property_id(&self) -> Option<PropertyId> {
        match self {
            Event::PropertyUpdated { property } => Some(property.id),
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                Some(booking.property_id)
            }
            Event::BookingStatusChanged { property_id, .. }
            | Event::BookingDeleted { property_id, .. } => Some(*property_id),
            Event::ReviewCreated { review } => Some(review.property_id),
            Event::UserRegistered { .. }
            | Event::PropertyCreated { .. }
            | Event::PropertyDeleted { .. } => None,
        }
    }
}
