use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decks::owned_deck;
use super::{require_text, ApiState, AuthUser, Envelope};
use crate::db::{CardEdit, NewCard};
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchDifficulty, MemoryCard, ReviewOutcome};
use crate::srs::CardSchedule;

const DEFAULT_QUEUE_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCardRequest {
    pub question: String,
    pub answer: String,
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub difficulty_level: Option<i64>,
    #[serde(default)]
    pub ai_generated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCardRequest {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub difficulty: BatchDifficulty,
    #[serde(default)]
    pub ai_generated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub cards: Vec<BatchCardRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreated {
    pub deck_id: String,
    pub cards_created: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEditRequest {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub difficulty_level: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordReviewRequest {
    pub outcome: ReviewOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecorded {
    pub card_id: String,
    pub outcome: ReviewOutcome,
    pub repetition_count: i64,
    pub interval_days: f64,
    pub ease_factor: f64,
    pub next_review_due: DateTime<Utc>,
}

fn require_difficulty(level: i64) -> ApiResult<()> {
    if !(1..=5).contains(&level) {
        return Err(ApiError::Validation(
            "difficultyLevel must be between 1 and 5".to_string(),
        ));
    }
    Ok(())
}

pub async fn add_card(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(deck_id): Path<String>,
    Json(req): Json<NewCardRequest>,
) -> ApiResult<impl IntoResponse> {
    require_text(&req.question, "question")?;
    require_text(&req.answer, "answer")?;
    let difficulty_level = req.difficulty_level.unwrap_or(3);
    require_difficulty(difficulty_level)?;

    let deck = owned_deck(&state, &auth, &deck_id).await?;
    let card = state
        .db
        .insert_card(&NewCard {
            deck_id: deck.deck_id,
            user_id: auth.user_id,
            question: req.question,
            answer: req.answer,
            section_id: req.section_id,
            chapter_id: req.chapter_id,
            difficulty_level,
            ai_generated: req.ai_generated,
        })
        .await?;

    Ok((StatusCode::CREATED, Envelope::new("Card created", card)))
}

pub async fn add_cards_batch(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(deck_id): Path<String>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.cards.is_empty() {
        return Err(ApiError::Validation(
            "cards must contain at least one entry".to_string(),
        ));
    }
    for card in &req.cards {
        require_text(&card.question, "question")?;
        require_text(&card.answer, "answer")?;
    }

    let deck = owned_deck(&state, &auth, &deck_id).await?;
    let new_cards: Vec<NewCard> = req
        .cards
        .into_iter()
        .map(|card| NewCard {
            deck_id: deck.deck_id.clone(),
            user_id: auth.user_id.clone(),
            question: card.question,
            answer: card.answer,
            section_id: req.section_id.clone(),
            chapter_id: req.chapter_id.clone(),
            difficulty_level: card.difficulty.level(),
            ai_generated: card.ai_generated,
        })
        .collect();

    let inserted = state.db.insert_cards_batch(&new_cards).await?;

    Ok((
        StatusCode::CREATED,
        Envelope::new(
            "Cards created",
            BatchCreated {
                deck_id: deck.deck_id,
                cards_created: inserted.len(),
            },
        ),
    ))
}

pub async fn update_card(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(card_id): Path<String>,
    Json(req): Json<CardEditRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(question) = &req.question {
        require_text(question, "question")?;
    }
    if let Some(answer) = &req.answer {
        require_text(answer, "answer")?;
    }
    if let Some(level) = req.difficulty_level {
        require_difficulty(level)?;
    }

    let card = owned_card(&state, &auth, &card_id).await?;
    let updated = state
        .db
        .update_card(
            &card,
            CardEdit {
                question: req.question,
                answer: req.answer,
                section_id: req.section_id,
                chapter_id: req.chapter_id,
                difficulty_level: req.difficulty_level,
            },
        )
        .await?;

    Ok(Envelope::new("Card updated", updated))
}

pub async fn delete_card(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(card_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let card = owned_card(&state, &auth, &card_id).await?;
    state.db.delete_card(&card.card_id).await?;
    Ok(Envelope::new("Card deleted", serde_json::json!({ "cardId": card.card_id })))
}

pub async fn review_queue(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(deck_id): Path<String>,
    Query(params): Query<QueueParams>,
) -> ApiResult<impl IntoResponse> {
    let deck = owned_deck(&state, &auth, &deck_id).await?;
    let limit = params.limit.unwrap_or(DEFAULT_QUEUE_LIMIT).clamp(1, 100);
    let cards = state.db.review_queue(&deck.deck_id, limit).await?;
    Ok(Envelope::new("Review queue retrieved", cards))
}

/// Records one review outcome. The configured policy computes the new
/// schedule; the handler never touches scheduling fields itself.
pub async fn record_review(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(card_id): Path<String>,
    Json(req): Json<RecordReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let card = owned_card(&state, &auth, &card_id).await?;

    // The policy gets its own repetitions counter, not the monotonic
    // outcome counter: SM-2 resets it on a lapse.
    let current = CardSchedule {
        ease_factor: card.ease_factor,
        interval_days: card.interval_days,
        repetition_count: card.sm2_repetitions,
        last_reviewed: card.last_reviewed,
        next_review_due: card.next_review_due,
    };
    let next = state.policy.review(&current, req.outcome, Utc::now());
    state.db.record_review(&card, &next, req.outcome).await?;

    Ok(Envelope::new(
        "Review recorded",
        ReviewRecorded {
            card_id: card.card_id,
            outcome: req.outcome,
            repetition_count: card.repetition_count + 1,
            interval_days: next.interval_days,
            ease_factor: next.ease_factor,
            next_review_due: next.next_review_due,
        },
    ))
}

pub async fn card_history(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(card_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let card = owned_card(&state, &auth, &card_id).await?;
    let history = state.db.card_history(&card.card_id).await?;
    Ok(Envelope::new("Review history retrieved", history))
}

async fn owned_card(state: &ApiState, auth: &AuthUser, card_id: &str) -> ApiResult<MemoryCard> {
    let card = state
        .db
        .get_card(card_id)
        .await?
        .ok_or(ApiError::NotFound("card"))?;
    if card.user_id != auth.user_id {
        return Err(ApiError::Forbidden("you do not own this card"));
    }
    Ok(card)
}
