use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-card difficulty used by the batch creation flow. The 3-point scale
/// maps onto the stored 1-5 numeric scale as easy=1, medium=3, hard=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchDifficulty {
    Easy,
    Medium,
    Hard,
}

impl BatchDifficulty {
    pub fn level(self) -> i64 {
        match self {
            Self::Easy => 1,
            Self::Medium => 3,
            Self::Hard => 5,
        }
    }
}

impl Default for BatchDifficulty {
    fn default() -> Self {
        Self::Medium
    }
}

/// Outcome of a single card review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Correct,
    Incorrect,
}

impl ReviewOutcome {
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

/// Deck plus the derived aggregation returned by list/detail endpoints.
/// `cards_count` and `success_rate` are computed in SQL on each fetch.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummary {
    pub deck_id: String,
    pub user_id: String,
    pub course_id: Option<String>,
    pub title: String,
    pub description: String,
    pub total_reviews: i64,
    pub correct_reviews: i64,
    pub cards_count: i64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCard {
    pub card_id: String,
    pub deck_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub difficulty_level: i64,
    pub ai_generated: bool,
    // Scheduler-owned state. Only the review endpoint moves these.
    // `sm2_repetitions` is the policy's own repetitions counter; it resets on
    // a lapse, unlike the monotonic `repetition_count` below.
    pub ease_factor: f64,
    pub interval_days: f64,
    pub sm2_repetitions: i64,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_review_due: DateTime<Utc>,
    pub repetition_count: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub created_at: DateTime<Utc>,
}

/// One recorded outcome in a card's append-only review history.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CardReviewEntry {
    pub card_id: String,
    pub reviewed_at: DateTime<Utc>,
    pub outcome: String,
    pub interval_days: f64,
    pub ease_factor: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CourseReview {
    pub review_id: String,
    pub course_id: String,
    pub user_id: String,
    pub rating: i64,
    pub comment: String,
    pub content_rating: Option<i64>,
    pub instructor_rating: Option<i64>,
    pub value_rating: Option<i64>,
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatingDistribution {
    #[serde(rename = "1")]
    pub one: i64,
    #[serde(rename = "2")]
    pub two: i64,
    #[serde(rename = "3")]
    pub three: i64,
    #[serde(rename = "4")]
    pub four: i64,
    #[serde(rename = "5")]
    pub five: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAverages {
    pub content: f64,
    pub instructor: f64,
    pub value: f64,
}

/// Per-course rating aggregate. Maintained incrementally on every review
/// create/update/delete, so reads never scan the reviews table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    pub total_reviews: i64,
    pub average_rating: f64,
    pub rating_distribution: RatingDistribution,
    pub category_averages: CategoryAverages,
}
