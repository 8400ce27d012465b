use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Fixed error taxonomy for the HTTP surface. Every failure maps to one of
/// these codes; internal detail is logged server-side and never returned.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("you must be enrolled in this course to review it")]
    NotEnrolled,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("you have already reviewed this course")]
    DuplicateReview,

    #[error("you cannot mark your own review as helpful")]
    SelfHelpful,

    #[error("alternative generator unavailable")]
    Upstream(#[source] anyhow::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::NotEnrolled => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::DuplicateReview | Self::SelfHelpful => {
                StatusCode::BAD_REQUEST
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotEnrolled => "not_enrolled",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::DuplicateReview => "duplicate_review",
            Self::SelfHelpful => "self_helpful",
            Self::Upstream(_) => "upstream_failed",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => log::error!("internal error: {err:#}"),
            Self::Upstream(err) => log::warn!("alternative generator call failed: {err:#}"),
            _ => {}
        }

        let body = Json(json!({
            "message": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
