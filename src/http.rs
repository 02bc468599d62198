//! The REST surface. Thin handlers: extract the actor, check policy,
//! call the engine, map errors to statuses.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use ulid::Ulid;
use validator::Validate;

use crate::auth::TokenStore;
use crate::engine::{Engine, EngineError, PageInfo, PropertyFilter};
use crate::model::*;
use crate::policy::{self, Actor, PolicyError};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub tokens: Arc<TokenStore>,
}

// ── Errors ───────────────────────────────────────────────

pub enum ApiError {
    Engine(EngineError),
    Policy(PolicyError),
    Unauthorized,
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<PolicyError> for ApiError {
    fn from(e: PolicyError) -> Self {
        ApiError::Policy(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    e if e.is_validation() => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %e, "request failed");
                }
                (status, e.to_string())
            }
            ApiError::Policy(e) => (StatusCode::FORBIDDEN, e.to_string()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid bearer token".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;
        state.tokens.resolve(token).ok_or(ApiError::Unauthorized)
    }
}

// ── Request/response bodies ──────────────────────────────

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize, Validate)]
pub struct PropertyRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 255))]
    pub location: String,
    pub county: Option<String>,
    pub town: Option<String>,
    pub price: Decimal,
    pub price_type: PriceType,
    pub kind: PropertyKind,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub area: Option<u32>,
    pub rental_type: Option<String>,
    pub images: Vec<String>,
    #[serde(default)]
    pub amenities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub featured: bool,
}

impl PropertyRequest {
    fn into_property(self, created_by: UserId) -> Property {
        Property {
            id: Ulid::nil(), // assigned by the engine
            title: self.title,
            location: self.location,
            county: self.county,
            town: self.town,
            price: self.price,
            price_type: self.price_type,
            kind: self.kind,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            area: self.area,
            rental_type: self.rental_type,
            images: self.images,
            amenities: self.amenities,
            featured: self.featured,
            created_by: Some(created_by),
            created_at: chrono::Utc::now(),
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct BookingRequest {
    pub property_id: PropertyId,
    #[validate(length(min = 1, max = 255))]
    pub guest_name: String,
    #[validate(email)]
    pub guest_email: String,
    #[validate(length(min = 1, max = 20))]
    pub guest_phone: String,
    pub booking_date: NaiveDate,
    pub check_in_date: Option<NaiveDate>,
    pub check_out_date: Option<NaiveDate>,
}

impl BookingRequest {
    fn into_booking(self, user_id: UserId) -> Booking {
        Booking {
            id: Ulid::nil(),
            property_id: self.property_id,
            user_id,
            guest_name: self.guest_name,
            guest_email: self.guest_email,
            guest_phone: self.guest_phone,
            booking_date: self.booking_date,
            check_in_date: self.check_in_date,
            check_out_date: self.check_out_date,
            status: BookingStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: BookingStatus,
}

#[derive(Deserialize, Validate)]
pub struct ReviewRequest {
    pub rating: u8,
    #[validate(length(max = 4096))]
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct PropertyQuery {
    pub county: Option<String>,
    pub town: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<PropertyKind>,
    pub rental_type: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub bedrooms: Option<u32>,
    pub featured: Option<bool>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl From<PropertyQuery> for PropertyFilter {
    fn from(q: PropertyQuery) -> Self {
        PropertyFilter {
            county: q.county,
            town: q.town,
            kind: q.kind,
            rental_type: q.rental_type,
            min_price: q.min_price,
            max_price: q.max_price,
            bedrooms: q.bedrooms,
            featured: q.featured,
            page: q.page,
            per_page: q.per_page,
        }
    }
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

#[derive(Serialize)]
pub struct PropertyPage {
    pub results: Vec<Property>,
    #[serde(flatten)]
    pub page: PageInfo,
}

fn check<T: Validate>(req: &T) -> Result<(), ApiError> {
    req.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check(&req)?;
    let user = state.engine.register_user(req.username, Role::User).await?;
    let token = state.tokens.issue(Actor {
        user_id: user.id,
        role: user.role,
    });
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertyQuery>,
) -> Json<PropertyPage> {
    let (results, page) = state.engine.list_properties(&query.into()).await;
    Json(PropertyPage { results, page })
}

async fn create_property(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<PropertyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    policy::write_property(&actor)?;
    check(&req)?;
    let property = state
        .engine
        .create_property(req.into_property(actor.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(property)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<PropertyId>,
) -> Result<Json<Property>, ApiError> {
    Ok(Json(state.engine.get_property(id).await?))
}

async fn update_property(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<PropertyId>,
    Json(req): Json<PropertyRequest>,
) -> Result<Json<Property>, ApiError> {
    policy::write_property(&actor)?;
    check(&req)?;
    let property = state
        .engine
        .update_property(id, req.into_property(actor.user_id))
        .await?;
    Ok(Json(property))
}

async fn delete_property(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<PropertyId>,
) -> Result<StatusCode, ApiError> {
    policy::write_property(&actor)?;
    state.engine.delete_property(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn property_availability(
    State(state): State<AppState>,
    Path(id): Path<PropertyId>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let blockers = state
        .engine
        .find_overlapping(id, query.check_in, query.check_out, None)
        .await?;
    Ok(Json(serde_json::json!({
        "available": blockers.is_empty(),
        "conflicts": blockers,
    })))
}

async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<PropertyId>,
) -> Result<Json<Vec<Review>>, ApiError> {
    Ok(Json(state.engine.reviews_for_property(id).await?))
}

async fn create_review(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<PropertyId>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check(&req)?;
    let review = state
        .engine
        .add_review(Review {
            id: Ulid::nil(),
            property_id: id,
            user_id: actor.user_id,
            rating: req.rating,
            comment: req.comment,
            created_at: chrono::Utc::now(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// Admins see every booking; everyone else sees their own.
async fn list_bookings(State(state): State<AppState>, actor: Actor) -> Json<Vec<Booking>> {
    let bookings = if actor.is_admin() {
        state.engine.all_bookings().await
    } else {
        state.engine.bookings_for_user(actor.user_id).await
    };
    Json(bookings)
}

async fn create_booking(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<BookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check(&req)?;
    let booking = state
        .engine
        .request_booking(req.into_booking(actor.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn get_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, ApiError> {
    let booking = state.engine.get_booking(id).await?;
    policy::read_booking(&actor, &booking)?;
    Ok(Json(booking))
}

async fn update_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<BookingId>,
    Json(req): Json<BookingRequest>,
) -> Result<Json<Booking>, ApiError> {
    check(&req)?;
    let current = state.engine.get_booking(id).await?;
    policy::modify_booking(&actor, &current)?;
    let booking = state
        .engine
        .update_booking(id, req.into_booking(current.user_id))
        .await?;
    Ok(Json(booking))
}

async fn delete_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<BookingId>,
) -> Result<StatusCode, ApiError> {
    let current = state.engine.get_booking(id).await?;
    policy::modify_booking(&actor, &current)?;
    state.engine.delete_booking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_booking_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<BookingId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Booking>, ApiError> {
    policy::transition_booking(&actor)?;
    let booking = state.engine.set_booking_status(id, req.status).await?;
    Ok(Json(booking))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/properties", get(list_properties).post(create_property))
        .route(
            "/api/properties/{id}",
            get(get_property)
                .put(update_property)
                .patch(update_property)
                .delete(delete_property),
        )
        .route("/api/properties/{id}/availability", get(property_availability))
        .route(
            "/api/properties/{id}/reviews",
            get(list_reviews).post(create_review),
        )
        .route("/api/bookings", get(list_bookings).post(create_booking))
        .route(
            "/api/bookings/{id}",
            get(get_booking)
                .put(update_booking)
                .patch(update_booking)
                .delete(delete_booking),
        )
        .route("/api/bookings/{id}/status", post(set_booking_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
