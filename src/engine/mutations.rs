//! State-changing operations. Every mutation validates, appends to the WAL,
//! and only then applies to memory, all while holding the property's write
//! lock so a concurrent request cannot sneak a conflicting write between
//! the check and the insert.

use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::validate;
use super::{Engine, EngineError};

impl Engine {
    pub async fn register_user(&self, username: String, role: Role) -> Result<User, EngineError> {
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::LimitExceeded("username length"));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("user count"));
        }

        let user = User {
            id: Ulid::new(),
            username: username.clone(),
            role,
            created_at: chrono::Utc::now(),
        };

        // Claim the name first; the entry API makes the uniqueness check and
        // the insert atomic.
        match self.usernames.entry(username.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::UsernameTaken(username));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        let event = Event::UserRegistered { user: user.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.usernames.remove(&username);
            return Err(e);
        }
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn create_property(&self, mut property: Property) -> Result<Property, EngineError> {
        validate::check_listing(&property)?;
        if self.state.len() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("property count"));
        }

        property.id = Ulid::new();
        property.created_at = chrono::Utc::now();

        let event = Event::PropertyCreated {
            property: property.clone(),
        };
        self.wal_append(&event).await?;
        self.state.insert(
            property.id,
            Arc::new(RwLock::new(PropertyState::new(property.clone()))),
        );
        self.notify.send(property.id, &event);
        Ok(property)
    }

    /// Full replacement of the listing. Identity fields (`id`, `created_by`,
    /// `created_at`) are preserved from the stored copy.
    pub async fn update_property(
        &self,
        id: PropertyId,
        mut property: Property,
    ) -> Result<Property, EngineError> {
        let ps = self.property_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        property.id = id;
        property.created_by = guard.listing.created_by;
        property.created_at = guard.listing.created_at;
        validate::check_listing(&property)?;

        let event = Event::PropertyUpdated {
            property: property.clone(),
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(property)
    }

    /// Removes the property and everything under it. Bookings and reviews go
    /// with it; subscribers see the delete event and the channel closes.
    pub async fn delete_property(&self, id: PropertyId) -> Result<(), EngineError> {
        let ps = self.property_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.write().await;

        let event = Event::PropertyDeleted { id };
        self.wal_append(&event).await?;

        for booking in &guard.bookings {
            self.booking_index.remove(&booking.id);
        }
        self.state.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// The booking request path. Validation and insertion happen under the
    /// property's write lock: two racing requests for the same dates
    /// serialize here, and the loser gets `Overlap`.
    pub async fn request_booking(&self, mut booking: Booking) -> Result<Booking, EngineError> {
        metrics::counter!(observability::BOOKING_REQUESTS_TOTAL).increment(1);

        validate::check_guest_fields(&booking)?;
        let ps = self
            .property_state(&booking.property_id)
            .ok_or(EngineError::NotFound(booking.property_id))?;
        let mut guard = ps.write().await;
        // The property may have been deleted between the map lookup and the
        // lock; admitting against the orphaned state would leave a dangling
        // booking.
        if !self.state.contains_key(&booking.property_id) {
            return Err(EngineError::NotFound(booking.property_id));
        }

        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("bookings per property"));
        }

        booking.id = Ulid::new();
        booking.status = BookingStatus::Pending;
        booking.created_at = chrono::Utc::now();

        if let Err(e) = validate::check_booking(&guard, &booking, validate::today(), None) {
            if matches!(e, EngineError::Overlap(_)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let property_id = booking.property_id;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(property_id, &mut guard, &event).await?;
        Ok(booking)
    }

    /// Reschedule or edit a booking. The booking keeps its property, status,
    /// and creator; the overlap check excludes the booking's own interval so
    /// shrinking or shifting within it is allowed.
    pub async fn update_booking(
        &self,
        id: BookingId,
        mut booking: Booking,
    ) -> Result<Booking, EngineError> {
        validate::check_guest_fields(&booking)?;
        let (property_id, mut guard) = self.resolve_booking_write(&id).await?;

        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        booking.id = id;
        booking.property_id = property_id;
        booking.user_id = current.user_id;
        booking.status = current.status;
        booking.created_at = current.created_at;

        validate::check_booking(&guard, &booking, validate::today(), Some(id))?;

        let event = Event::BookingUpdated {
            booking: booking.clone(),
        };
        self.persist_and_apply(property_id, &mut guard, &event).await?;
        Ok(booking)
    }

    pub async fn delete_booking(&self, id: BookingId) -> Result<(), EngineError> {
        let (property_id, mut guard) = self.resolve_booking_write(&id).await?;
        if guard.booking(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::BookingDeleted { id, property_id };
        self.persist_and_apply(property_id, &mut guard, &event).await?;
        Ok(())
    }

    /// The admin lifecycle step: pending → confirmed or pending → cancelled.
    /// On success the guest gets an email, fire and forget — a mail failure
    /// is logged and counted but never rolls the transition back.
    pub async fn set_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (property_id, mut guard) = self.resolve_booking_write(&id).await?;

        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            property_id,
            status,
        };
        self.persist_and_apply(property_id, &mut guard, &event).await?;

        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let mailer = self.mailer.clone();
        let to = booking.guest_email.clone();
        let subject = match status {
            BookingStatus::Confirmed => format!("Booking {id} confirmed"),
            BookingStatus::Cancelled => format!("Booking {id} cancelled"),
            _ => format!("Booking {id} updated"),
        };
        let body = format!(
            "Hello {}, your booking for {} is now {:?}.",
            booking.guest_name, guard.listing.title, status
        );
        tokio::spawn(async move {
            match mailer.send(&to, &subject, &body).await {
                Ok(()) => {
                    metrics::counter!(observability::MAIL_SENT_TOTAL).increment(1);
                }
                Err(e) => {
                    metrics::counter!(observability::MAIL_FAILURES_TOTAL).increment(1);
                    tracing::warn!(booking = %id, error = %e, "status notification mail failed");
                }
            }
        });

        Ok(booking)
    }

    /// One review per user per property.
    pub async fn add_review(&self, mut review: Review) -> Result<Review, EngineError> {
        validate::check_review(&review)?;
        let ps = self
            .property_state(&review.property_id)
            .ok_or(EngineError::NotFound(review.property_id))?;
        let mut guard = ps.write().await;
        if !self.state.contains_key(&review.property_id) {
            return Err(EngineError::NotFound(review.property_id));
        }

        if guard.reviews.len() >= MAX_REVIEWS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("reviews per property"));
        }
        if guard.has_review_by(review.user_id) {
            return Err(EngineError::DuplicateReview);
        }

        review.id = Ulid::new();
        review.created_at = chrono::Utc::now();

        let property_id = review.property_id;
        let event = Event::ReviewCreated {
            review: review.clone(),
        };
        self.persist_and_apply(property_id, &mut guard, &event).await?;
        Ok(review)
    }
}
