use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// The booking validator. Checks, in order:
/// 1. `booking_date` is not in the past,
/// 2. the stay interval is not inverted,
/// 3. no existing booking on the property overlaps the stay inclusively
///    (skipping cancelled bookings and, on update, the booking itself).
///
/// A booking without both check-in and check-out dates skips steps 2 and 3 —
/// it soft-books the property without blocking anyone.
pub(crate) fn check_booking(
    state: &PropertyState,
    booking: &Booking,
    today: NaiveDate,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    if booking.booking_date < today {
        return Err(EngineError::PastBookingDate(booking.booking_date));
    }

    let Some(stay) = booking.stay() else {
        return Ok(());
    };
    if stay.is_inverted() {
        return Err(EngineError::InvertedStay {
            check_in: stay.check_in,
            check_out: stay.check_out,
        });
    }
    if let Some(existing) = state.overlapping(&stay, exclude).next() {
        return Err(EngineError::Overlap(existing.id));
    }
    Ok(())
}

pub(crate) fn check_guest_fields(booking: &Booking) -> Result<(), EngineError> {
    if booking.guest_name.is_empty() || booking.guest_name.len() > MAX_GUEST_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name length"));
    }
    if booking.guest_email.len() > MAX_GUEST_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("guest email length"));
    }
    if booking.guest_phone.len() > MAX_GUEST_PHONE_LEN {
        return Err(EngineError::LimitExceeded("guest phone length"));
    }
    Ok(())
}

/// The listing image invariant: between 3 and 6 image references, none
/// absurdly long. Violations reject the whole write before persistence.
pub(crate) fn check_listing(property: &Property) -> Result<(), EngineError> {
    let n = property.images.len();
    if !(MIN_PROPERTY_IMAGES..=MAX_PROPERTY_IMAGES).contains(&n) {
        return Err(EngineError::ImageCount(n));
    }
    if property.images.iter().any(|url| url.len() > MAX_IMAGE_URL_LEN) {
        return Err(EngineError::LimitExceeded("image url length"));
    }
    if property.title.is_empty() || property.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title length"));
    }
    if property.location.is_empty() || property.location.len() > MAX_LOCATION_LEN {
        return Err(EngineError::LimitExceeded("location length"));
    }
    if property.price.is_sign_negative() {
        return Err(EngineError::NegativePrice);
    }
    if property.amenities.len() > MAX_AMENITY_CATEGORIES
        || property
            .amenities
            .values()
            .any(|facilities| facilities.len() > MAX_AMENITIES_PER_CATEGORY)
    {
        return Err(EngineError::LimitExceeded("amenities size"));
    }
    Ok(())
}

pub(crate) fn check_review(review: &Review) -> Result<(), EngineError> {
    if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
        return Err(EngineError::InvalidRating(review.rating));
    }
    if review
        .comment
        .as_ref()
        .is_some_and(|c| c.len() > MAX_COMMENT_LEN)
    {
        return Err(EngineError::LimitExceeded("comment length"));
    }
    Ok(())
}
