use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{require_rating, require_text, ApiState, AuthUser, Envelope};
use crate::db::{NewReview, ReviewEdit};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseRequest {
    pub course_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseCreated {
    pub course_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
    pub content_rating: Option<i64>,
    pub instructor_rating: Option<i64>,
    pub value_rating: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReviewRequest {
    pub rating: Option<i64>,
    pub comment: Option<String>,
    pub content_rating: Option<i64>,
    pub instructor_rating: Option<i64>,
    pub value_rating: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkHelpfulRequest {
    pub helpful: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpfulUpdated {
    pub review_id: String,
    pub helpful_count: i64,
}

fn validate_categories(
    content: Option<i64>,
    instructor: Option<i64>,
    value: Option<i64>,
) -> ApiResult<()> {
    if let Some(rating) = content {
        require_rating(rating, "contentRating")?;
    }
    if let Some(rating) = instructor {
        require_rating(rating, "instructorRating")?;
    }
    if let Some(rating) = value {
        require_rating(rating, "valueRating")?;
    }
    Ok(())
}

pub async fn create_course(
    State(state): State<ApiState>,
    auth: AuthUser,
    Json(req): Json<CreateCourseRequest>,
) -> ApiResult<impl IntoResponse> {
    if !auth.is_admin {
        return Err(ApiError::Forbidden("admin access required"));
    }
    require_text(&req.title, "title")?;

    let course_id = req
        .course_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if state.db.course_exists(&course_id).await? {
        return Err(ApiError::Validation("course already exists".to_string()));
    }
    state.db.create_course(&course_id, req.title.trim()).await?;

    Ok((
        StatusCode::CREATED,
        Envelope::new("Course created", CourseCreated { course_id }),
    ))
}

pub async fn enroll(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(course_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.db.course_exists(&course_id).await? {
        return Err(ApiError::NotFound("course"));
    }
    state.db.enroll(&course_id, &auth.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Envelope::new("Enrolled", CourseCreated { course_id }),
    ))
}

pub async fn list_reviews(
    State(state): State<ApiState>,
    Path(course_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.db.course_exists(&course_id).await? {
        return Err(ApiError::NotFound("course"));
    }
    let reviews = state.db.list_reviews(&course_id).await?;
    Ok(Envelope::new("Reviews retrieved", reviews))
}

pub async fn create_review(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(course_id): Path<String>,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    if !state.db.course_exists(&course_id).await? {
        return Err(ApiError::NotFound("course"));
    }
    if !state.db.is_enrolled(&course_id, &auth.user_id).await? {
        return Err(ApiError::NotEnrolled);
    }
    require_rating(req.rating, "rating")?;
    validate_categories(req.content_rating, req.instructor_rating, req.value_rating)?;

    // One review per user per course: a second submission is rejected, not
    // merged into the existing one.
    if state
        .db
        .find_user_review(&course_id, &auth.user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::DuplicateReview);
    }

    let review = state
        .db
        .insert_review(&NewReview {
            course_id,
            user_id: auth.user_id,
            rating: req.rating,
            comment: req.comment,
            content_rating: req.content_rating,
            instructor_rating: req.instructor_rating,
            value_rating: req.value_rating,
        })
        .await?;

    Ok((StatusCode::CREATED, Envelope::new("Review created", review)))
}

pub async fn update_review(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(review_id): Path<String>,
    Json(req): Json<UpdateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let review = state
        .db
        .get_review(&review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))?;
    if review.user_id != auth.user_id {
        return Err(ApiError::Forbidden("only the review author can update it"));
    }
    if let Some(rating) = req.rating {
        require_rating(rating, "rating")?;
    }
    validate_categories(req.content_rating, req.instructor_rating, req.value_rating)?;

    let updated = state
        .db
        .update_review(
            &review,
            ReviewEdit {
                rating: req.rating,
                comment: req.comment,
                content_rating: req.content_rating,
                instructor_rating: req.instructor_rating,
                value_rating: req.value_rating,
            },
        )
        .await?;

    Ok(Envelope::new("Review updated", updated))
}

pub async fn delete_review(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(review_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let review = state
        .db
        .get_review(&review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))?;
    if review.user_id != auth.user_id && !auth.is_admin {
        return Err(ApiError::Forbidden(
            "only the review author or an admin can delete it",
        ));
    }

    state.db.delete_review(&review).await?;
    Ok(Envelope::new(
        "Review deleted",
        serde_json::json!({ "reviewId": review.review_id }),
    ))
}

pub async fn mark_helpful(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(review_id): Path<String>,
    Json(req): Json<MarkHelpfulRequest>,
) -> ApiResult<impl IntoResponse> {
    let review = state
        .db
        .get_review(&review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))?;
    if review.user_id == auth.user_id {
        return Err(ApiError::SelfHelpful);
    }

    let helpful_count = state
        .db
        .set_helpful(&review.review_id, &auth.user_id, req.helpful)
        .await?;

    Ok(Envelope::new(
        "Helpfulness updated",
        HelpfulUpdated {
            review_id: review.review_id,
            helpful_count,
        },
    ))
}

pub async fn rating_stats(
    State(state): State<ApiState>,
    Path(course_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.db.course_exists(&course_id).await? {
        return Err(ApiError::NotFound("course"));
    }
    let stats = state.db.rating_stats(&course_id).await?;
    Ok(Envelope::new("Rating stats retrieved", stats))
}
