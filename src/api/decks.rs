use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{require_text, ApiState, AuthUser, Envelope};
use crate::error::{ApiError, ApiResult};
use crate::models::{DeckSummary, MemoryCard};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeckRequest {
    pub course_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckCreated {
    pub deck_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckDetail {
    #[serde(flatten)]
    pub deck: DeckSummary,
    pub cards: Vec<MemoryCard>,
}

pub async fn create_deck(
    State(state): State<ApiState>,
    auth: AuthUser,
    Json(req): Json<CreateDeckRequest>,
) -> ApiResult<impl IntoResponse> {
    require_text(&req.title, "title")?;

    let deck_id = state
        .db
        .create_deck(
            &auth.user_id,
            req.course_id.as_deref(),
            req.title.trim(),
            &req.description,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Envelope::new("Deck created", DeckCreated { deck_id }),
    ))
}

pub async fn list_decks(
    State(state): State<ApiState>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let decks = state.db.list_decks(&auth.user_id).await?;
    Ok(Envelope::new("Decks retrieved", decks))
}

pub async fn get_deck(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(deck_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deck = owned_deck(&state, &auth, &deck_id).await?;
    let cards = state.db.deck_cards(&deck_id).await?;
    Ok(Envelope::new("Deck retrieved", DeckDetail { deck, cards }))
}

pub async fn delete_deck(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(deck_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deck = owned_deck(&state, &auth, &deck_id).await?;
    state.db.delete_deck(&deck.deck_id).await?;
    Ok(Envelope::new(
        "Deck deleted",
        serde_json::json!({ "deckId": deck.deck_id }),
    ))
}

/// Fetches a deck and enforces ownership.
pub(super) async fn owned_deck(
    state: &ApiState,
    auth: &AuthUser,
    deck_id: &str,
) -> ApiResult<DeckSummary> {
    let deck = state
        .db
        .get_deck(deck_id)
        .await?
        .ok_or(ApiError::NotFound("deck"))?;
    if deck.user_id != auth.user_id {
        return Err(ApiError::Forbidden("you do not own this deck"));
    }
    Ok(deck)
}
