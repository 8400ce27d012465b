use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::ReviewOutcome;

/// Scheduling state carried by a card between reviews.
#[derive(Debug, Clone, PartialEq)]
pub struct CardSchedule {
    pub ease_factor: f64,
    pub interval_days: f64,
    pub repetition_count: i64,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_review_due: DateTime<Utc>,
}

impl CardSchedule {
    /// State of a freshly created card: no reviews yet, first review due
    /// 24 hours after creation.
    pub fn initial(created_at: DateTime<Utc>) -> Self {
        Self {
            ease_factor: 2.5,
            interval_days: 0.0,
            repetition_count: 0,
            last_reviewed: None,
            next_review_due: created_at + Duration::hours(24),
        }
    }
}

/// A spaced-repetition scheduling policy. The review endpoint never computes
/// due dates itself; it hands the current state and the outcome to the
/// configured policy and persists whatever comes back.
pub trait ReviewPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn review(
        &self,
        current: &CardSchedule,
        outcome: ReviewOutcome,
        now: DateTime<Utc>,
    ) -> CardSchedule;
}

/// SM-2.
///
/// Grade:
/// 5 - Perfect response
/// 3 - Correct response recalled with serious difficulty
/// 0 - Complete blackout.
///
/// The review endpoint only distinguishes correct/incorrect, so correct maps
/// to grade 5 and incorrect to grade 0. Intermediate grades can be added
/// later if clients grow "Hard/Good/Easy" buttons.
#[derive(Debug, Clone)]
pub struct Sm2Policy {
    pub minimum_ease: f64,
}

impl Default for Sm2Policy {
    fn default() -> Self {
        Self { minimum_ease: 1.3 }
    }
}

impl ReviewPolicy for Sm2Policy {
    fn name(&self) -> &'static str {
        "sm2"
    }

    fn review(
        &self,
        current: &CardSchedule,
        outcome: ReviewOutcome,
        now: DateTime<Utc>,
    ) -> CardSchedule {
        let grade: u8 = if outcome.is_correct() { 5 } else { 0 };

        let mut interval = current.interval_days;
        let mut repetitions = current.repetition_count;

        if grade >= 3 {
            if repetitions == 0 {
                interval = 1.0;
            } else if repetitions == 1 {
                interval = 6.0;
            } else {
                interval = (interval * current.ease_factor).round();
            }
            repetitions += 1;
        } else {
            repetitions = 0;
            interval = 1.0;
        }

        // EF' = EF + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02))
        let q = grade as f64;
        let ease = current.ease_factor + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
        let ease = ease.max(self.minimum_ease);

        CardSchedule {
            ease_factor: ease,
            interval_days: interval,
            repetition_count: repetitions,
            last_reviewed: Some(now),
            next_review_due: now + Duration::seconds((interval * 86400.0) as i64),
        }
    }
}

/// Fixed 24-hour interval regardless of outcome. Matches the creation-time
/// default and serves as the conservative fallback when SM-2 is not wanted.
#[derive(Debug, Clone)]
pub struct FixedIntervalPolicy {
    pub hours: i64,
}

impl Default for FixedIntervalPolicy {
    fn default() -> Self {
        Self { hours: 24 }
    }
}

impl ReviewPolicy for FixedIntervalPolicy {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn review(
        &self,
        current: &CardSchedule,
        _outcome: ReviewOutcome,
        now: DateTime<Utc>,
    ) -> CardSchedule {
        CardSchedule {
            ease_factor: current.ease_factor,
            interval_days: self.hours as f64 / 24.0,
            repetition_count: current.repetition_count + 1,
            last_reviewed: Some(now),
            next_review_due: now + Duration::hours(self.hours),
        }
    }
}

pub fn policy_from_name(name: &str) -> anyhow::Result<Arc<dyn ReviewPolicy>> {
    match name {
        "sm2" => Ok(Arc::new(Sm2Policy::default())),
        "fixed" => Ok(Arc::new(FixedIntervalPolicy::default())),
        other => anyhow::bail!("unknown SRS policy '{other}' (expected 'sm2' or 'fixed')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewed(policy: &dyn ReviewPolicy, schedule: CardSchedule, outcomes: &[ReviewOutcome]) -> CardSchedule {
        let mut schedule = schedule;
        let mut now = Utc::now();
        for outcome in outcomes {
            schedule = policy.review(&schedule, *outcome, now);
            now = schedule.next_review_due;
        }
        schedule
    }

    #[test]
    fn sm2_correct_interval_sequence() {
        let policy = Sm2Policy::default();
        let start = CardSchedule::initial(Utc::now());

        let s1 = reviewed(&policy, start.clone(), &[ReviewOutcome::Correct]);
        assert_eq!(s1.interval_days, 1.0);
        assert_eq!(s1.repetition_count, 1);

        let s2 = reviewed(&policy, start.clone(), &[ReviewOutcome::Correct; 2]);
        assert_eq!(s2.interval_days, 6.0);

        let s3 = reviewed(&policy, start, &[ReviewOutcome::Correct; 3]);
        // Third interval = round(6 * ease). Ease grew 2.5 -> 2.6 -> 2.7 over
        // the two prior perfect reviews.
        assert_eq!(s3.interval_days, (6.0 * s2.ease_factor).round());
        assert!(s3.interval_days > 6.0);
    }

    #[test]
    fn sm2_incorrect_resets_progress() {
        let policy = Sm2Policy::default();
        let start = CardSchedule::initial(Utc::now());

        let s = reviewed(
            &policy,
            start,
            &[
                ReviewOutcome::Correct,
                ReviewOutcome::Correct,
                ReviewOutcome::Incorrect,
            ],
        );
        assert_eq!(s.repetition_count, 0);
        assert_eq!(s.interval_days, 1.0);

        // Recovery starts over at 1 day.
        let now = s.next_review_due;
        let s = policy.review(&s, ReviewOutcome::Correct, now);
        assert_eq!(s.interval_days, 1.0);
        assert_eq!(s.repetition_count, 1);
    }

    #[test]
    fn sm2_ease_never_drops_below_floor() {
        let policy = Sm2Policy::default();
        let mut schedule = CardSchedule::initial(Utc::now());
        let mut now = Utc::now();
        for _ in 0..20 {
            schedule = policy.review(&schedule, ReviewOutcome::Incorrect, now);
            now = schedule.next_review_due;
        }
        assert_eq!(schedule.ease_factor, 1.3);
    }

    #[test]
    fn next_due_is_after_last_reviewed() {
        let now = Utc::now();
        for policy in [
            &Sm2Policy::default() as &dyn ReviewPolicy,
            &FixedIntervalPolicy::default(),
        ] {
            for outcome in [ReviewOutcome::Correct, ReviewOutcome::Incorrect] {
                let s = policy.review(&CardSchedule::initial(now), outcome, now);
                assert_eq!(s.last_reviewed, Some(now));
                assert!(s.next_review_due > now, "policy {}", policy.name());
            }
        }
    }

    #[test]
    fn fixed_policy_always_24_hours() {
        let policy = FixedIntervalPolicy::default();
        let now = Utc::now();
        let s = policy.review(&CardSchedule::initial(now), ReviewOutcome::Incorrect, now);
        assert_eq!(s.next_review_due, now + Duration::hours(24));
        assert_eq!(s.ease_factor, 2.5);
        assert_eq!(s.repetition_count, 1);
    }

    #[test]
    fn policy_lookup() {
        assert_eq!(policy_from_name("sm2").unwrap().name(), "sm2");
        assert_eq!(policy_from_name("fixed").unwrap().name(), "fixed");
        assert!(policy_from_name("anki").is_err());
    }
}
