//! Who may do what. Listings are world-readable but admin-writable;
//! bookings belong to their creator; lifecycle transitions are admin-only.

use crate::model::{Booking, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PolicyError {
    Forbidden(&'static str),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Forbidden(what) => write!(f, "forbidden: {what}"),
        }
    }
}

impl std::error::Error for PolicyError {}

pub fn write_property(actor: &Actor) -> Result<(), PolicyError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("property writes are admin-only"))
    }
}

pub fn read_booking(actor: &Actor, booking: &Booking) -> Result<(), PolicyError> {
    modify_booking(actor, booking)
}

pub fn modify_booking(actor: &Actor, booking: &Booking) -> Result<(), PolicyError> {
    if actor.is_admin() || booking.user_id == actor.user_id {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("not your booking"))
    }
}

pub fn transition_booking(actor: &Actor) -> Result<(), PolicyError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(PolicyError::Forbidden(
            "booking status changes are admin-only",
        ))
    }
}
