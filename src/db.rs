use std::str::FromStr;

use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Pool, Sqlite};
use uuid::Uuid;

use crate::models::{
    CardReviewEntry, CategoryAverages, CourseReview, DeckSummary, MemoryCard, RatingDistribution,
    RatingStats, ReviewOutcome,
};
use crate::srs::CardSchedule;

const DECK_SUMMARY_SELECT: &str = r#"
    SELECT d.deck_id, d.user_id, d.course_id, d.title, d.description,
           d.total_reviews, d.correct_reviews, d.created_at,
           (SELECT COUNT(*) FROM cards c WHERE c.deck_id = d.deck_id) AS cards_count,
           CASE WHEN d.total_reviews > 0
                THEN CAST(d.correct_reviews AS REAL) / d.total_reviews
                ELSE 0.0
           END AS success_rate
    FROM decks d
"#;

#[derive(Debug, Clone)]
pub struct NewCard {
    pub deck_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub difficulty_level: i64,
    pub ai_generated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CardEdit {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub section_id: Option<String>,
    pub chapter_id: Option<String>,
    pub difficulty_level: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub course_id: String,
    pub user_id: String,
    pub rating: i64,
    pub comment: String,
    pub content_rating: Option<i64>,
    pub instructor_rating: Option<i64>,
    pub value_rating: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewEdit {
    pub rating: Option<i64>,
    pub comment: Option<String>,
    pub content_rating: Option<i64>,
    pub instructor_rating: Option<i64>,
    pub value_rating: Option<i64>,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database. Each call gets a fresh store; the pool is
    /// pinned to one connection so the memory database is not duplicated.
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        // One statement per query; sqlx prepares each individually.
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                deck_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                course_id TEXT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                total_reviews INTEGER NOT NULL DEFAULT 0,
                correct_reviews INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                card_id TEXT PRIMARY KEY,
                deck_id TEXT NOT NULL REFERENCES decks(deck_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                section_id TEXT,
                chapter_id TEXT,
                difficulty_level INTEGER NOT NULL DEFAULT 3,
                ai_generated BOOLEAN NOT NULL DEFAULT 0,
                ease_factor REAL NOT NULL DEFAULT 2.5,
                interval_days REAL NOT NULL DEFAULT 0,
                sm2_repetitions INTEGER NOT NULL DEFAULT 0,
                last_reviewed DATETIME,
                next_review_due DATETIME NOT NULL,
                repetition_count INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                incorrect_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_cards_deck_due ON cards(deck_id, next_review_due)",
            r#"
            CREATE TABLE IF NOT EXISTS card_review_log (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                card_id TEXT NOT NULL REFERENCES cards(card_id) ON DELETE CASCADE,
                reviewed_at DATETIME NOT NULL,
                outcome TEXT NOT NULL,
                interval_days REAL NOT NULL,
                ease_factor REAL NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS courses (
                course_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS enrollments (
                course_id TEXT NOT NULL REFERENCES courses(course_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                enrolled_at DATETIME NOT NULL,
                PRIMARY KEY (course_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS course_reviews (
                review_id TEXT PRIMARY KEY,
                course_id TEXT NOT NULL REFERENCES courses(course_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                content_rating INTEGER,
                instructor_rating INTEGER,
                value_rating INTEGER,
                helpful_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE (course_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS review_helpful (
                review_id TEXT NOT NULL REFERENCES course_reviews(review_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                PRIMARY KEY (review_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS course_rating_stats (
                course_id TEXT PRIMARY KEY REFERENCES courses(course_id) ON DELETE CASCADE,
                review_count INTEGER NOT NULL DEFAULT 0,
                rating_sum INTEGER NOT NULL DEFAULT 0,
                rating_1 INTEGER NOT NULL DEFAULT 0,
                rating_2 INTEGER NOT NULL DEFAULT 0,
                rating_3 INTEGER NOT NULL DEFAULT 0,
                rating_4 INTEGER NOT NULL DEFAULT 0,
                rating_5 INTEGER NOT NULL DEFAULT 0,
                content_sum INTEGER NOT NULL DEFAULT 0,
                content_count INTEGER NOT NULL DEFAULT 0,
                instructor_sum INTEGER NOT NULL DEFAULT 0,
                instructor_count INTEGER NOT NULL DEFAULT 0,
                value_sum INTEGER NOT NULL DEFAULT 0,
                value_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ---- decks ----

    pub async fn create_deck(
        &self,
        user_id: &str,
        course_id: Option<&str>,
        title: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let deck_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO decks (deck_id, user_id, course_id, title, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&deck_id)
        .bind(user_id)
        .bind(course_id)
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(deck_id)
    }

    pub async fn list_decks(&self, user_id: &str) -> anyhow::Result<Vec<DeckSummary>> {
        let sql = format!("{DECK_SUMMARY_SELECT} WHERE d.user_id = ? ORDER BY d.created_at DESC");
        let decks = sqlx::query_as::<_, DeckSummary>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(decks)
    }

    pub async fn get_deck(&self, deck_id: &str) -> anyhow::Result<Option<DeckSummary>> {
        let sql = format!("{DECK_SUMMARY_SELECT} WHERE d.deck_id = ?");
        let deck = sqlx::query_as::<_, DeckSummary>(&sql)
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(deck)
    }

    /// Cards and their review history go with the deck (cascading FKs).
    pub async fn delete_deck(&self, deck_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM decks WHERE deck_id = ?")
            .bind(deck_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- cards ----

    pub async fn insert_card(&self, new: &NewCard) -> anyhow::Result<MemoryCard> {
        let now = Utc::now();
        let schedule = CardSchedule::initial(now);
        let card = MemoryCard {
            card_id: Uuid::new_v4().to_string(),
            deck_id: new.deck_id.clone(),
            user_id: new.user_id.clone(),
            question: new.question.clone(),
            answer: new.answer.clone(),
            section_id: new.section_id.clone(),
            chapter_id: new.chapter_id.clone(),
            difficulty_level: new.difficulty_level,
            ai_generated: new.ai_generated,
            ease_factor: schedule.ease_factor,
            interval_days: schedule.interval_days,
            sm2_repetitions: 0,
            last_reviewed: None,
            next_review_due: schedule.next_review_due,
            repetition_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;
        Self::insert_card_row(&mut tx, &card).await?;
        tx.commit().await?;

        Ok(card)
    }

    /// All-or-nothing batch insert. A failure on any card rolls the whole
    /// batch back, so a retried submission never leaves a partial deck.
    pub async fn insert_cards_batch(&self, cards: &[NewCard]) -> anyhow::Result<Vec<MemoryCard>> {
        let now = Utc::now();
        let schedule = CardSchedule::initial(now);

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(cards.len());
        for new in cards {
            let card = MemoryCard {
                card_id: Uuid::new_v4().to_string(),
                deck_id: new.deck_id.clone(),
                user_id: new.user_id.clone(),
                question: new.question.clone(),
                answer: new.answer.clone(),
                section_id: new.section_id.clone(),
                chapter_id: new.chapter_id.clone(),
                difficulty_level: new.difficulty_level,
                ai_generated: new.ai_generated,
                ease_factor: schedule.ease_factor,
                interval_days: schedule.interval_days,
                sm2_repetitions: 0,
                last_reviewed: None,
                next_review_due: schedule.next_review_due,
                repetition_count: 0,
                correct_count: 0,
                incorrect_count: 0,
                created_at: now,
            };
            Self::insert_card_row(&mut tx, &card).await?;
            inserted.push(card);
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn insert_card_row(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        card: &MemoryCard,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO cards (card_id, deck_id, user_id, question, answer,
                                section_id, chapter_id, difficulty_level, ai_generated,
                                ease_factor, interval_days, sm2_repetitions, last_reviewed,
                                next_review_due, repetition_count, correct_count, incorrect_count,
                                created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&card.card_id)
        .bind(&card.deck_id)
        .bind(&card.user_id)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(&card.section_id)
        .bind(&card.chapter_id)
        .bind(card.difficulty_level)
        .bind(card.ai_generated)
        .bind(card.ease_factor)
        .bind(card.interval_days)
        .bind(card.sm2_repetitions)
        .bind(card.last_reviewed)
        .bind(card.next_review_due)
        .bind(card.repetition_count)
        .bind(card.correct_count)
        .bind(card.incorrect_count)
        .bind(card.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn deck_cards(&self, deck_id: &str) -> anyhow::Result<Vec<MemoryCard>> {
        let cards = sqlx::query_as::<_, MemoryCard>(
            "SELECT * FROM cards WHERE deck_id = ? ORDER BY created_at ASC",
        )
        .bind(deck_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cards)
    }

    pub async fn get_card(&self, card_id: &str) -> anyhow::Result<Option<MemoryCard>> {
        let card = sqlx::query_as::<_, MemoryCard>("SELECT * FROM cards WHERE card_id = ?")
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(card)
    }

    pub async fn update_card(
        &self,
        card: &MemoryCard,
        edit: CardEdit,
    ) -> anyhow::Result<MemoryCard> {
        let mut updated = card.clone();
        if let Some(question) = edit.question {
            updated.question = question;
        }
        if let Some(answer) = edit.answer {
            updated.answer = answer;
        }
        if let Some(level) = edit.difficulty_level {
            updated.difficulty_level = level;
        }
        if edit.section_id.is_some() {
            updated.section_id = edit.section_id;
        }
        if edit.chapter_id.is_some() {
            updated.chapter_id = edit.chapter_id;
        }

        sqlx::query(
            "UPDATE cards SET question = ?, answer = ?, difficulty_level = ?,
                              section_id = ?, chapter_id = ?
             WHERE card_id = ?",
        )
        .bind(&updated.question)
        .bind(&updated.answer)
        .bind(updated.difficulty_level)
        .bind(&updated.section_id)
        .bind(&updated.chapter_id)
        .bind(&updated.card_id)
        .execute(&self.pool)
        .await?;

        Ok(updated)
    }

    pub async fn delete_card(&self, card_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cards WHERE card_id = ?")
            .bind(card_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Review queue for one deck. Order priority:
    /// 1. Due cards, most overdue first.
    /// 2. New cards (never reviewed), randomized.
    /// 3. If the batch is still short, upcoming cards with the earliest due
    ///    date ("review ahead").
    /// The final batch is shuffled for interleaved practice.
    pub async fn review_queue(&self, deck_id: &str, limit: i64) -> anyhow::Result<Vec<MemoryCard>> {
        let now = Utc::now();

        let mut cards = sqlx::query_as::<_, MemoryCard>(
            r#"
            SELECT * FROM cards
            WHERE deck_id = ?
              AND (
                    repetition_count = 0
                    OR strftime('%s', next_review_due) <= strftime('%s', ?)
                  )
            ORDER BY
                CASE WHEN repetition_count = 0 THEN 1 ELSE 0 END ASC,
                CASE WHEN repetition_count > 0 THEN strftime('%s', next_review_due) ELSE 0 END ASC,
                RANDOM()
            LIMIT ?
            "#,
        )
        .bind(deck_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if (cards.len() as i64) < limit {
            let needed = limit - cards.len() as i64;
            let ahead = sqlx::query_as::<_, MemoryCard>(
                r#"
                SELECT * FROM cards
                WHERE deck_id = ?
                  AND repetition_count > 0
                  AND strftime('%s', next_review_due) > strftime('%s', ?)
                ORDER BY strftime('%s', next_review_due) ASC
                LIMIT ?
                "#,
            )
            .bind(deck_id)
            .bind(now)
            .bind(needed)
            .fetch_all(&self.pool)
            .await?;
            cards.extend(ahead);
        }

        cards.shuffle(&mut rand::thread_rng());
        Ok(cards)
    }

    /// Persists one review outcome: the new schedule, the card counters, the
    /// owning deck's counters, and the history row move in one transaction.
    pub async fn record_review(
        &self,
        card: &MemoryCard,
        schedule: &CardSchedule,
        outcome: ReviewOutcome,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE cards SET ease_factor = ?, interval_days = ?, sm2_repetitions = ?,
                              last_reviewed = ?, next_review_due = ?,
                              repetition_count = repetition_count + 1,
                              correct_count = correct_count + ?,
                              incorrect_count = incorrect_count + ?
             WHERE card_id = ?",
        )
        .bind(schedule.ease_factor)
        .bind(schedule.interval_days)
        .bind(schedule.repetition_count)
        .bind(schedule.last_reviewed)
        .bind(schedule.next_review_due)
        .bind(if outcome.is_correct() { 1 } else { 0 })
        .bind(if outcome.is_correct() { 0 } else { 1 })
        .bind(&card.card_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE decks SET total_reviews = total_reviews + 1,
                              correct_reviews = correct_reviews + ?
             WHERE deck_id = ?",
        )
        .bind(if outcome.is_correct() { 1 } else { 0 })
        .bind(&card.deck_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO card_review_log (card_id, reviewed_at, outcome, interval_days, ease_factor)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&card.card_id)
        .bind(schedule.last_reviewed)
        .bind(outcome.as_str())
        .bind(schedule.interval_days)
        .bind(schedule.ease_factor)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn card_history(&self, card_id: &str) -> anyhow::Result<Vec<CardReviewEntry>> {
        let entries = sqlx::query_as::<_, CardReviewEntry>(
            "SELECT card_id, reviewed_at, outcome, interval_days, ease_factor
             FROM card_review_log WHERE card_id = ? ORDER BY log_id ASC",
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // ---- courses & enrollment ----

    pub async fn create_course(&self, course_id: &str, title: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO courses (course_id, title, created_at) VALUES (?, ?, ?)")
            .bind(course_id)
            .bind(title)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn course_exists(&self, course_id: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM courses WHERE course_id = ?")
            .bind(course_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn enroll(&self, course_id: &str, user_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO enrollments (course_id, user_id, enrolled_at) VALUES (?, ?, ?)",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_enrolled(&self, course_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM enrollments WHERE course_id = ? AND user_id = ?",
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    // ---- course reviews ----

    pub async fn list_reviews(&self, course_id: &str) -> anyhow::Result<Vec<CourseReview>> {
        let reviews = sqlx::query_as::<_, CourseReview>(
            "SELECT * FROM course_reviews WHERE course_id = ? ORDER BY created_at DESC",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    pub async fn get_review(&self, review_id: &str) -> anyhow::Result<Option<CourseReview>> {
        let review =
            sqlx::query_as::<_, CourseReview>("SELECT * FROM course_reviews WHERE review_id = ?")
                .bind(review_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(review)
    }

    pub async fn find_user_review(
        &self,
        course_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<CourseReview>> {
        let review = sqlx::query_as::<_, CourseReview>(
            "SELECT * FROM course_reviews WHERE course_id = ? AND user_id = ?",
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(review)
    }

    pub async fn insert_review(&self, new: &NewReview) -> anyhow::Result<CourseReview> {
        let now = Utc::now();
        let review = CourseReview {
            review_id: Uuid::new_v4().to_string(),
            course_id: new.course_id.clone(),
            user_id: new.user_id.clone(),
            rating: new.rating,
            comment: new.comment.clone(),
            content_rating: new.content_rating,
            instructor_rating: new.instructor_rating,
            value_rating: new.value_rating,
            helpful_count: 0,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO course_reviews (review_id, course_id, user_id, rating, comment,
                                         content_rating, instructor_rating, value_rating,
                                         helpful_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&review.review_id)
        .bind(&review.course_id)
        .bind(&review.user_id)
        .bind(review.rating)
        .bind(&review.comment)
        .bind(review.content_rating)
        .bind(review.instructor_rating)
        .bind(review.value_rating)
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::apply_rating_delta(&mut tx, &review, 1).await?;
        tx.commit().await?;

        Ok(review)
    }

    pub async fn update_review(
        &self,
        review: &CourseReview,
        edit: ReviewEdit,
    ) -> anyhow::Result<CourseReview> {
        let mut updated = review.clone();
        if let Some(rating) = edit.rating {
            updated.rating = rating;
        }
        if let Some(comment) = edit.comment {
            updated.comment = comment;
        }
        if edit.content_rating.is_some() {
            updated.content_rating = edit.content_rating;
        }
        if edit.instructor_rating.is_some() {
            updated.instructor_rating = edit.instructor_rating;
        }
        if edit.value_rating.is_some() {
            updated.value_rating = edit.value_rating;
        }
        updated.updated_at = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE course_reviews SET rating = ?, comment = ?, content_rating = ?,
                                       instructor_rating = ?, value_rating = ?, updated_at = ?
             WHERE review_id = ?",
        )
        .bind(updated.rating)
        .bind(&updated.comment)
        .bind(updated.content_rating)
        .bind(updated.instructor_rating)
        .bind(updated.value_rating)
        .bind(updated.updated_at)
        .bind(&updated.review_id)
        .execute(&mut *tx)
        .await?;

        // Aggregate adjustment: remove the old contribution, add the new one.
        Self::apply_rating_delta(&mut tx, review, -1).await?;
        Self::apply_rating_delta(&mut tx, &updated, 1).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn delete_review(&self, review: &CourseReview) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_reviews WHERE review_id = ?")
            .bind(&review.review_id)
            .execute(&mut *tx)
            .await?;
        Self::apply_rating_delta(&mut tx, review, -1).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_rating_delta(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        review: &CourseReview,
        sign: i64,
    ) -> anyhow::Result<()> {
        let star = |value: i64| if review.rating == value { sign } else { 0 };
        let cat_sum = |rating: Option<i64>| rating.map(|r| sign * r).unwrap_or(0);
        let cat_count = |rating: Option<i64>| rating.map(|_| sign).unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO course_rating_stats (course_id, review_count, rating_sum,
                rating_1, rating_2, rating_3, rating_4, rating_5,
                content_sum, content_count, instructor_sum, instructor_count,
                value_sum, value_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(course_id) DO UPDATE SET
                review_count = review_count + excluded.review_count,
                rating_sum = rating_sum + excluded.rating_sum,
                rating_1 = rating_1 + excluded.rating_1,
                rating_2 = rating_2 + excluded.rating_2,
                rating_3 = rating_3 + excluded.rating_3,
                rating_4 = rating_4 + excluded.rating_4,
                rating_5 = rating_5 + excluded.rating_5,
                content_sum = content_sum + excluded.content_sum,
                content_count = content_count + excluded.content_count,
                instructor_sum = instructor_sum + excluded.instructor_sum,
                instructor_count = instructor_count + excluded.instructor_count,
                value_sum = value_sum + excluded.value_sum,
                value_count = value_count + excluded.value_count
            "#,
        )
        .bind(&review.course_id)
        .bind(sign)
        .bind(sign * review.rating)
        .bind(star(1))
        .bind(star(2))
        .bind(star(3))
        .bind(star(4))
        .bind(star(5))
        .bind(cat_sum(review.content_rating))
        .bind(cat_count(review.content_rating))
        .bind(cat_sum(review.instructor_rating))
        .bind(cat_count(review.instructor_rating))
        .bind(cat_sum(review.value_rating))
        .bind(cat_count(review.value_rating))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Helpfulness is a set per review; the stored count is recomputed from
    /// the set inside the same transaction, so double-marking can never
    /// double-increment.
    pub async fn set_helpful(
        &self,
        review_id: &str,
        user_id: &str,
        helpful: bool,
    ) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;

        if helpful {
            sqlx::query("INSERT OR IGNORE INTO review_helpful (review_id, user_id) VALUES (?, ?)")
                .bind(review_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("DELETE FROM review_helpful WHERE review_id = ? AND user_id = ?")
                .bind(review_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE course_reviews
             SET helpful_count = (SELECT COUNT(*) FROM review_helpful WHERE review_id = ?)
             WHERE review_id = ?",
        )
        .bind(review_id)
        .bind(review_id)
        .execute(&mut *tx)
        .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT helpful_count FROM course_reviews WHERE review_id = ?")
                .bind(review_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(count)
    }

    /// Single-row read of the incrementally maintained aggregate. A course
    /// with no reviews yields the all-zero structure.
    pub async fn rating_stats(&self, course_id: &str) -> anyhow::Result<RatingStats> {
        #[derive(sqlx::FromRow)]
        struct StatsRow {
            review_count: i64,
            rating_sum: i64,
            rating_1: i64,
            rating_2: i64,
            rating_3: i64,
            rating_4: i64,
            rating_5: i64,
            content_sum: i64,
            content_count: i64,
            instructor_sum: i64,
            instructor_count: i64,
            value_sum: i64,
            value_count: i64,
        }

        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT review_count, rating_sum, rating_1, rating_2, rating_3, rating_4, rating_5,
                    content_sum, content_count, instructor_sum, instructor_count,
                    value_sum, value_count
             FROM course_rating_stats WHERE course_id = ?",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(RatingStats::default());
        };

        let avg = |sum: i64, count: i64| {
            if count > 0 {
                sum as f64 / count as f64
            } else {
                0.0
            }
        };

        Ok(RatingStats {
            total_reviews: row.review_count,
            average_rating: avg(row.rating_sum, row.review_count),
            rating_distribution: RatingDistribution {
                one: row.rating_1,
                two: row.rating_2,
                three: row.rating_3,
                four: row.rating_4,
                five: row.rating_5,
            },
            category_averages: CategoryAverages {
                content: avg(row.content_sum, row.content_count),
                instructor: avg(row.instructor_sum, row.instructor_count),
                value: avg(row.value_sum, row.value_count),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srs::{ReviewPolicy, Sm2Policy};
    use chrono::Duration;

    async fn test_db() -> Db {
        Db::in_memory().await.unwrap()
    }

    fn new_card(deck_id: &str, question: &str) -> NewCard {
        NewCard {
            deck_id: deck_id.to_string(),
            user_id: "user-1".to_string(),
            question: question.to_string(),
            answer: "a".to_string(),
            section_id: Some("sec-1".to_string()),
            chapter_id: Some("ch-1".to_string()),
            difficulty_level: 3,
            ai_generated: false,
        }
    }

    async fn seeded_review(db: &Db, course: &str, user: &str, rating: i64) -> CourseReview {
        db.insert_review(&NewReview {
            course_id: course.to_string(),
            user_id: user.to_string(),
            rating,
            comment: String::new(),
            content_rating: None,
            instructor_rating: None,
            value_rating: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn new_card_defaults() {
        let db = test_db().await;
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let card = db.insert_card(&new_card(&deck_id, "q")).await.unwrap();

        assert_eq!(card.repetition_count, 0);
        assert_eq!(card.correct_count, 0);
        assert_eq!(card.incorrect_count, 0);
        assert!(card.last_reviewed.is_none());

        // First review due 24h after creation.
        let offset = card.next_review_due - card.created_at;
        assert_eq!(offset, Duration::hours(24));
    }

    #[tokio::test]
    async fn batch_insert_creates_n_cards_sharing_context() {
        let db = test_db().await;
        let deck_id = db
            .create_deck("user-1", Some("course-9"), "Deck", "")
            .await
            .unwrap();

        let batch: Vec<NewCard> = (0..5).map(|i| new_card(&deck_id, &format!("q{i}"))).collect();
        let inserted = db.insert_cards_batch(&batch).await.unwrap();
        assert_eq!(inserted.len(), 5);

        let cards = db.deck_cards(&deck_id).await.unwrap();
        assert_eq!(cards.len(), 5);
        for card in &cards {
            assert_eq!(card.section_id.as_deref(), Some("sec-1"));
            assert_eq!(card.chapter_id.as_deref(), Some("ch-1"));
        }

        let deck = db.get_deck(&deck_id).await.unwrap().unwrap();
        assert_eq!(deck.cards_count, 5);
    }

    #[tokio::test]
    async fn deck_success_rate_guards_zero_reviews() {
        let db = test_db().await;
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let deck = db.get_deck(&deck_id).await.unwrap().unwrap();
        assert_eq!(deck.total_reviews, 0);
        assert_eq!(deck.success_rate, 0.0);
    }

    /// Mirrors the review handler: rebuild the policy input from the stored
    /// card (scheduler-owned fields) and persist the result.
    async fn apply_outcome(db: &Db, policy: &dyn ReviewPolicy, card_id: &str, outcome: ReviewOutcome) -> MemoryCard {
        let card = db.get_card(card_id).await.unwrap().unwrap();
        let schedule = CardSchedule {
            ease_factor: card.ease_factor,
            interval_days: card.interval_days,
            repetition_count: card.sm2_repetitions,
            last_reviewed: card.last_reviewed,
            next_review_due: card.next_review_due,
        };
        let next = policy.review(&schedule, outcome, Utc::now());
        db.record_review(&card, &next, outcome).await.unwrap();
        db.get_card(card_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn record_review_keeps_counters_in_sync() {
        let db = test_db().await;
        let policy = Sm2Policy::default();
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let card = db.insert_card(&new_card(&deck_id, "q")).await.unwrap();

        for (i, outcome) in [
            ReviewOutcome::Correct,
            ReviewOutcome::Correct,
            ReviewOutcome::Incorrect,
        ]
        .iter()
        .enumerate()
        {
            let card = apply_outcome(&db, &policy, &card.card_id, *outcome).await;
            assert_eq!(card.repetition_count, i as i64 + 1);
            assert_eq!(
                card.repetition_count,
                card.correct_count + card.incorrect_count
            );
            assert!(card.next_review_due >= card.last_reviewed.unwrap());
        }

        let card = db.get_card(&card.card_id).await.unwrap().unwrap();
        assert_eq!(card.correct_count, 2);
        assert_eq!(card.incorrect_count, 1);

        // Deck counters match the sum of child-card counters.
        let deck = db.get_deck(&deck_id).await.unwrap().unwrap();
        assert_eq!(deck.total_reviews, 3);
        assert_eq!(deck.correct_reviews, 2);
        assert!((deck.success_rate - 2.0 / 3.0).abs() < 1e-9);

        // One history row per outcome, oldest first.
        let history = db.card_history(&card.card_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].outcome, "correct");
        assert_eq!(history[2].outcome, "incorrect");
    }

    #[tokio::test]
    async fn persisted_sm2_state_restarts_after_lapse() {
        let db = test_db().await;
        let policy = Sm2Policy::default();
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let card = db.insert_card(&new_card(&deck_id, "q")).await.unwrap();

        let card = apply_outcome(&db, &policy, &card.card_id, ReviewOutcome::Correct).await;
        assert_eq!(card.interval_days, 1.0);
        let card = apply_outcome(&db, &policy, &card.card_id, ReviewOutcome::Correct).await;
        assert_eq!(card.interval_days, 6.0);

        // A lapse resets the scheduler's repetitions, while the outcome
        // counter stays monotonic.
        let card = apply_outcome(&db, &policy, &card.card_id, ReviewOutcome::Incorrect).await;
        assert_eq!(card.interval_days, 1.0);
        assert_eq!(card.sm2_repetitions, 0);
        assert_eq!(card.repetition_count, 3);

        // Recovery restarts the 1, 6, ... sequence instead of compounding
        // from the pre-lapse interval.
        let card = apply_outcome(&db, &policy, &card.card_id, ReviewOutcome::Correct).await;
        assert_eq!(card.interval_days, 1.0);
        assert_eq!(card.sm2_repetitions, 1);
        assert_eq!(card.repetition_count, 4);

        let card = apply_outcome(&db, &policy, &card.card_id, ReviewOutcome::Correct).await;
        assert_eq!(card.interval_days, 6.0);
    }

    #[tokio::test]
    async fn delete_deck_cascades_to_cards_and_history() {
        let db = test_db().await;
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let card = db.insert_card(&new_card(&deck_id, "q")).await.unwrap();

        let schedule = Sm2Policy::default().review(
            &CardSchedule::initial(card.created_at),
            ReviewOutcome::Correct,
            Utc::now(),
        );
        db.record_review(&card, &schedule, ReviewOutcome::Correct)
            .await
            .unwrap();

        db.delete_deck(&deck_id).await.unwrap();
        assert!(db.get_deck(&deck_id).await.unwrap().is_none());
        assert!(db.get_card(&card.card_id).await.unwrap().is_none());
        assert!(db.card_history(&card.card_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn review_queue_prefers_overdue_and_respects_limit() {
        let db = test_db().await;
        let deck_id = db.create_deck("user-1", None, "Deck", "").await.unwrap();
        let other_deck = db.create_deck("user-2", None, "Other", "").await.unwrap();

        let overdue = db.insert_card(&new_card(&deck_id, "overdue")).await.unwrap();
        let upcoming = db.insert_card(&new_card(&deck_id, "upcoming")).await.unwrap();
        db.insert_card(&new_card(&other_deck, "foreign")).await.unwrap();

        // Push one card into the past and one far into the future.
        let now = Utc::now();
        for (card_id, due, reps) in [
            (&overdue.card_id, now - Duration::days(3), 2),
            (&upcoming.card_id, now + Duration::days(30), 2),
        ] {
            sqlx::query(
                "UPDATE cards SET next_review_due = ?, last_reviewed = ?, repetition_count = ? WHERE card_id = ?",
            )
            .bind(due)
            .bind(now - Duration::days(4))
            .bind(reps)
            .bind(card_id)
            .execute(&db.pool)
            .await
            .unwrap();
        }

        let queue = db.review_queue(&deck_id, 1).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].card_id, overdue.card_id);

        // With room to spare the upcoming card is pulled in as review-ahead,
        // but never a card from another deck.
        let queue = db.review_queue(&deck_id, 10).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|c| c.deck_id == deck_id));
    }

    #[tokio::test]
    async fn duplicate_review_is_rejected_by_lookup() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        seeded_review(&db, "course-1", "user-1", 5).await;

        assert!(db
            .find_user_review("course-1", "user-1")
            .await
            .unwrap()
            .is_some());
        assert!(db
            .find_user_review("course-1", "user-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rating_stats_match_spec_example() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        seeded_review(&db, "course-1", "u1", 5).await;
        seeded_review(&db, "course-1", "u2", 3).await;
        seeded_review(&db, "course-1", "u3", 4).await;

        let stats = db.rating_stats("course-1").await.unwrap();
        assert_eq!(stats.total_reviews, 3);
        assert_eq!(stats.average_rating, 4.0);
        assert_eq!(
            stats.rating_distribution,
            RatingDistribution {
                one: 0,
                two: 0,
                three: 1,
                four: 1,
                five: 1,
            }
        );
    }

    #[tokio::test]
    async fn rating_stats_zero_reviews_is_all_zero() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        let stats = db.rating_stats("course-1").await.unwrap();
        assert_eq!(stats, RatingStats::default());
    }

    #[tokio::test]
    async fn rating_stats_track_update_and_delete() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        let review = db
            .insert_review(&NewReview {
                course_id: "course-1".to_string(),
                user_id: "u1".to_string(),
                rating: 5,
                comment: "great".to_string(),
                content_rating: Some(4),
                instructor_rating: None,
                value_rating: None,
            })
            .await
            .unwrap();
        seeded_review(&db, "course-1", "u2", 3).await;

        let updated = db
            .update_review(
                &review,
                ReviewEdit {
                    rating: Some(1),
                    content_rating: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = db.rating_stats("course-1").await.unwrap();
        assert_eq!(stats.total_reviews, 2);
        assert_eq!(stats.average_rating, 2.0);
        assert_eq!(stats.rating_distribution.one, 1);
        assert_eq!(stats.rating_distribution.five, 0);
        assert_eq!(stats.category_averages.content, 2.0);

        db.delete_review(&updated).await.unwrap();
        let stats = db.rating_stats("course-1").await.unwrap();
        assert_eq!(stats.total_reviews, 1);
        assert_eq!(stats.average_rating, 3.0);
        assert_eq!(stats.category_averages.content, 0.0);
    }

    #[tokio::test]
    async fn helpful_is_a_set_toggle() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        let review = seeded_review(&db, "course-1", "u1", 4).await;

        // Marking twice never double-increments.
        assert_eq!(db.set_helpful(&review.review_id, "u2", true).await.unwrap(), 1);
        assert_eq!(db.set_helpful(&review.review_id, "u2", true).await.unwrap(), 1);
        assert_eq!(db.set_helpful(&review.review_id, "u3", true).await.unwrap(), 2);

        // Unmarking when absent is a no-op.
        assert_eq!(db.set_helpful(&review.review_id, "u4", false).await.unwrap(), 2);
        assert_eq!(db.set_helpful(&review.review_id, "u2", false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enrollment_is_idempotent() {
        let db = test_db().await;
        db.create_course("course-1", "Rust 101").await.unwrap();
        assert!(!db.is_enrolled("course-1", "u1").await.unwrap());

        db.enroll("course-1", "u1").await.unwrap();
        db.enroll("course-1", "u1").await.unwrap();
        assert!(db.is_enrolled("course-1", "u1").await.unwrap());
    }
}
