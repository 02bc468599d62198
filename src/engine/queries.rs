//! Read-side operations. All take read locks only.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::model::*;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Default)]
pub struct PropertyFilter {
    pub county: Option<String>,
    pub town: Option<String>,
    pub kind: Option<PropertyKind>,
    pub rental_type: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub bedrooms: Option<u32>,
    pub featured: Option<bool>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl PropertyFilter {
    fn matches(&self, p: &Property) -> bool {
        if let Some(county) = &self.county
            && !contains_ci(p.county.as_deref(), county)
            && !contains_ci(Some(&p.location), county)
        {
            return false;
        }
        if let Some(town) = &self.town
            && !contains_ci(p.town.as_deref(), town)
            && !contains_ci(Some(&p.location), town)
        {
            return false;
        }
        if let Some(kind) = self.kind
            && p.kind != kind
        {
            return false;
        }
        if let Some(rt) = &self.rental_type
            && !p
                .rental_type
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case(rt))
        {
            return false;
        }
        if let Some(min) = self.min_price
            && p.price < min
        {
            return false;
        }
        if let Some(max) = self.max_price
            && p.price > max
        {
            return false;
        }
        if let Some(bedrooms) = self.bedrooms
            && p.bedrooms != Some(bedrooms)
        {
            return false;
        }
        if let Some(featured) = self.featured
            && p.featured != featured
        {
            return false;
        }
        true
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

/// Pagination envelope for list endpoints. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

fn paginate<T>(mut items: Vec<T>, page: Option<usize>, per_page: Option<usize>) -> (Vec<T>, PageInfo) {
    let per_page = per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = page.unwrap_or(1).max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page).max(1);

    let start = page.saturating_sub(1).saturating_mul(per_page);
    let slice = if start >= total_items {
        Vec::new()
    } else {
        items.drain(..).skip(start).take(per_page).collect()
    };

    let info = PageInfo {
        page,
        total_pages,
        total_items,
        has_next: page < total_pages,
        has_previous: page > 1,
    };
    (slice, info)
}

impl Engine {
    pub async fn get_property(&self, id: PropertyId) -> Result<Property, EngineError> {
        let ps = self.property_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        Ok(guard.listing.clone())
    }

    /// Filtered, paginated listing. Newest first.
    pub async fn list_properties(&self, filter: &PropertyFilter) -> (Vec<Property>, PageInfo) {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut listings = Vec::new();
        for ps in handles {
            let guard = ps.read().await;
            if filter.matches(&guard.listing) {
                listings.push(guard.listing.clone());
            }
        }
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(listings, filter.page, filter.per_page)
    }

    /// Bookings on a property that block the given interval. The availability
    /// probe: an empty result means the dates are free right now (though only
    /// `request_booking` can claim them race-free).
    pub async fn find_overlapping(
        &self,
        property_id: PropertyId,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude: Option<BookingId>,
    ) -> Result<Vec<Booking>, EngineError> {
        let ps = self
            .property_state(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        let range = StayRange::new(check_in, check_out);
        Ok(guard.overlapping(&range, exclude).cloned().collect())
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let property_id = self
            .property_of_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ps = self
            .property_state(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All bookings created by `user_id`, across properties, newest first.
    pub async fn bookings_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for ps in handles {
            let guard = ps.read().await;
            bookings.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == user_id)
                    .cloned(),
            );
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    /// Every booking in the system, newest first. Admin view.
    pub async fn all_bookings(&self) -> Vec<Booking> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for ps in handles {
            let guard = ps.read().await;
            bookings.extend(guard.bookings.iter().cloned());
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    pub async fn reviews_for_property(&self, id: PropertyId) -> Result<Vec<Review>, EngineError> {
        let ps = self.property_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        Ok(guard.reviews.clone())
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<User> {
        let id = *self.usernames.get(username)?.value();
        self.get_user(id)
    }
}
