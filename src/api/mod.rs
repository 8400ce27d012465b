pub mod ai;
pub mod cards;
pub mod decks;
pub mod reviews;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ai::AiClient;
use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::srs::ReviewPolicy;

#[derive(Clone)]
pub struct ApiState {
    pub db: Db,
    pub policy: Arc<dyn ReviewPolicy>,
    pub ai: Option<AiClient>,
}

/// The one fixed response shape. Every success body is `{ message, data }`;
/// clients never have to sniff between envelope variants.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub message: String,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(message: &str, data: T) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            data,
        })
    }
}

/// Caller identity, established upstream by the identity provider and passed
/// through the gateway as headers. Missing identity is a 401; role checks
/// happen per handler.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub is_admin: bool,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ApiError::Unauthorized)?
            .to_string();

        let is_admin = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .map(|role| role.eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(AuthUser { user_id, is_admin })
    }
}

pub(crate) fn require_text(value: &str, field: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_rating(value: i64, field: &str) -> ApiResult<()> {
    if !(1..=5).contains(&value) {
        return Err(ApiError::Validation(format!(
            "{field} must be between 1 and 5"
        )));
    }
    Ok(())
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/decks", post(decks::create_deck).get(decks::list_decks))
        .route(
            "/api/decks/:deck_id",
            get(decks::get_deck).delete(decks::delete_deck),
        )
        .route("/api/decks/:deck_id/cards", post(cards::add_card))
        .route("/api/decks/:deck_id/cards/batch", post(cards::add_cards_batch))
        .route("/api/decks/:deck_id/queue", get(cards::review_queue))
        .route(
            "/api/cards/:card_id",
            put(cards::update_card).delete(cards::delete_card),
        )
        .route("/api/cards/:card_id/review", post(cards::record_review))
        .route("/api/cards/:card_id/history", get(cards::card_history))
        .route("/api/courses", post(reviews::create_course))
        .route("/api/courses/:course_id/enrollments", post(reviews::enroll))
        .route(
            "/api/courses/:course_id/reviews",
            get(reviews::list_reviews).post(reviews::create_review),
        )
        .route(
            "/api/courses/:course_id/rating-stats",
            get(reviews::rating_stats),
        )
        .route(
            "/api/reviews/:review_id",
            put(reviews::update_review).delete(reviews::delete_review),
        )
        .route("/api/reviews/:review_id/helpful", post(reviews::mark_helpful))
        .route("/api/ai/alternatives", post(ai::generate_alternatives))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
