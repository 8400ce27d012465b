use anyhow::anyhow;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::{require_text, ApiState, AuthUser, Envelope};
use crate::error::{ApiError, ApiResult};

const DEFAULT_ALTERNATIVES: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativesRequest {
    pub question: String,
    pub answer: String,
    pub count: Option<usize>,
}

pub async fn generate_alternatives(
    State(state): State<ApiState>,
    _auth: AuthUser,
    Json(req): Json<AlternativesRequest>,
) -> ApiResult<impl IntoResponse> {
    require_text(&req.question, "question")?;
    require_text(&req.answer, "answer")?;
    let count = req.count.unwrap_or(DEFAULT_ALTERNATIVES).clamp(1, 10);

    let client = state
        .ai
        .as_ref()
        .ok_or_else(|| ApiError::Upstream(anyhow!("generator not configured")))?;

    let alternatives = client
        .generate_alternatives(&req.question, &req.answer, count)
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Envelope::new("Alternatives generated", alternatives))
}
