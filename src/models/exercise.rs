use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::db::types::ScoringType;

/// Upper bound for default and individual working times.
pub const MAX_WORKING_SECONDS: i64 = 366 * 24 * 60 * 60;

/// A quiz exercise as served during its live window.
///
/// The cached copy is always replaced as a whole, so every reader observes a
/// self-consistent question set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizExercise {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub release_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub duration_seconds: i64,
    pub is_open_for_practice: bool,
    pub is_visible_before_start: bool,
    pub is_planned_to_start: bool,
    /// username -> working time in seconds counted from the release date
    #[serde(default)]
    pub individual_durations: BTreeMap<String, i64>,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: i64,
    pub title: String,
    pub points: f64,
    pub scoring_type: ScoringType,
    #[serde(default)]
    pub invalid: bool,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<AnswerOption>,
    },
    DragAndDrop {
        drag_items: Vec<DragItem>,
        drop_locations: Vec<DropLocation>,
        correct_mappings: Vec<DragAndDropMapping>,
    },
    ShortAnswer {
        spots: Vec<ShortAnswerSpot>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: i64,
    pub text: String,
    pub is_correct: bool,
    #[serde(default)]
    pub invalid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragItem {
    pub id: i64,
    #[serde(default)]
    pub invalid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropLocation {
    pub id: i64,
    #[serde(default)]
    pub invalid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DragAndDropMapping {
    pub drag_item_id: i64,
    pub drop_location_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortAnswerSpot {
    pub id: i64,
    /// Accepted answers; compared trimmed and case-insensitively.
    pub solutions: Vec<String>,
    #[serde(default)]
    pub invalid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("exercise {0} has a due date before its release date")]
    DueBeforeRelease(i64),
    #[error("exercise {0} must have a positive duration")]
    NonPositiveDuration(i64),
    #[error("exercise {0} has a duration longer than a year")]
    DurationTooLong(i64),
    #[error("exercise {exercise_id} has an out-of-range working time for {username}")]
    IndividualDurationOutOfRange { exercise_id: i64, username: String },
    #[error("question {0} must have non-negative finite points")]
    InvalidPoints(i64),
    #[error("question id {0} is used more than once")]
    DuplicateQuestion(i64),
}

impl QuizExercise {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(release), Some(due)) = (self.release_date, self.due_date) {
            if due < release {
                return Err(ValidationError::DueBeforeRelease(self.id));
            }
        }
        if self.duration_seconds <= 0 {
            return Err(ValidationError::NonPositiveDuration(self.id));
        }
        if self.duration_seconds > MAX_WORKING_SECONDS {
            return Err(ValidationError::DurationTooLong(self.id));
        }
        for (username, seconds) in &self.individual_durations {
            if !(1..=MAX_WORKING_SECONDS).contains(seconds) {
                return Err(ValidationError::IndividualDurationOutOfRange {
                    exercise_id: self.id,
                    username: username.clone(),
                });
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for question in &self.questions {
            if !question.points.is_finite() || question.points < 0.0 {
                return Err(ValidationError::InvalidPoints(question.id));
            }
            if !seen.insert(question.id) {
                return Err(ValidationError::DuplicateQuestion(question.id));
            }
        }

        Ok(())
    }

    pub fn question(&self, question_id: i64) -> Option<&QuizQuestion> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    /// Sum of the points of all questions not flagged invalid.
    pub fn max_score(&self) -> f64 {
        self.questions.iter().filter(|question| !question.invalid).map(|q| q.points).sum()
    }

    pub fn is_started(&self, now: OffsetDateTime) -> bool {
        self.release_date.is_some_and(|release| release <= now)
    }

    /// Deadline for participants without an individual working time.
    pub fn default_deadline(&self) -> Option<OffsetDateTime> {
        let by_duration = self.release_plus(self.duration_seconds)?;
        Some(match self.due_date {
            Some(due) if due < by_duration => due,
            _ => by_duration,
        })
    }

    pub fn deadline_for(&self, username: &str) -> Option<OffsetDateTime> {
        match self.individual_durations.get(username) {
            Some(seconds) => self.release_plus(*seconds),
            None => self.default_deadline(),
        }
    }

    /// The last instant at which any participant may still be submitting.
    pub fn latest_deadline(&self) -> Option<OffsetDateTime> {
        let default = self.default_deadline()?;
        Some(
            self.individual_durations
                .values()
                .filter_map(|seconds| self.release_plus(*seconds))
                .fold(default, |latest, candidate| latest.max(candidate)),
        )
    }

    /// `None` without a release date or when the sum leaves the calendar.
    fn release_plus(&self, seconds: i64) -> Option<OffsetDateTime> {
        self.release_date?.checked_add(Duration::seconds(seconds))
    }

    pub fn is_ended_for(&self, username: &str, now: OffsetDateTime) -> bool {
        self.deadline_for(username).is_some_and(|deadline| now > deadline)
    }

    pub fn is_ended(&self, now: OffsetDateTime) -> bool {
        self.latest_deadline().is_some_and(|deadline| now > deadline)
    }

    /// Whether `username` may still submit for credit at `now`.
    pub fn is_submission_allowed(
        &self,
        username: &str,
        now: OffsetDateTime,
        grace: Duration,
    ) -> bool {
        if !self.is_started(now) {
            return false;
        }
        self.deadline_for(username).is_some_and(|deadline| {
            deadline.checked_add(grace).map_or(true, |closes| now <= closes)
        })
    }

    /// Whether an open submission of `username` is past its deadline plus
    /// `grace` and has to be closed as a timeout.
    pub fn is_expired_for(&self, username: &str, now: OffsetDateTime, grace: Duration) -> bool {
        self.deadline_for(username).is_some_and(|deadline| {
            deadline.checked_add(grace).is_some_and(|closes| now > closes)
        })
    }
}

impl QuizQuestion {
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

impl QuestionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MultipleChoice { .. } => "multiple_choice",
            Self::DragAndDrop { .. } => "drag_and_drop",
            Self::ShortAnswer { .. } => "short_answer",
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::test_support::fixtures;

    #[test]
    fn deadline_is_the_earlier_of_due_date_and_duration() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.release_date = Some(datetime!(2026-03-01 10:00 UTC));
        exercise.duration_seconds = 600;
        exercise.due_date = Some(datetime!(2026-03-01 10:05 UTC));
        assert_eq!(exercise.default_deadline(), Some(datetime!(2026-03-01 10:05 UTC)));

        exercise.due_date = None;
        assert_eq!(exercise.default_deadline(), Some(datetime!(2026-03-01 10:10 UTC)));
    }

    #[test]
    fn individual_duration_replaces_default_deadline() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.release_date = Some(datetime!(2026-03-01 10:00 UTC));
        exercise.due_date = None;
        exercise.duration_seconds = 600;
        exercise.individual_durations.insert("extended".to_string(), 1200);

        assert_eq!(exercise.deadline_for("extended"), Some(datetime!(2026-03-01 10:20 UTC)));
        assert_eq!(exercise.deadline_for("regular"), Some(datetime!(2026-03-01 10:10 UTC)));
        assert_eq!(exercise.latest_deadline(), Some(datetime!(2026-03-01 10:20 UTC)));
        assert!(!exercise.is_ended(datetime!(2026-03-01 10:15 UTC)));
        assert!(exercise.is_ended_for("regular", datetime!(2026-03-01 10:15 UTC)));
    }

    #[test]
    fn submission_window_respects_release_and_grace() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.release_date = Some(datetime!(2026-03-01 10:00 UTC));
        exercise.due_date = None;
        exercise.duration_seconds = 60;

        let grace = Duration::seconds(5);
        assert!(!exercise.is_submission_allowed("u", datetime!(2026-03-01 09:59:59 UTC), grace));
        assert!(exercise.is_submission_allowed("u", datetime!(2026-03-01 10:01:04 UTC), grace));
        assert!(!exercise.is_submission_allowed("u", datetime!(2026-03-01 10:01:06 UTC), grace));
    }

    #[test]
    fn validate_rejects_due_before_release() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.release_date = Some(datetime!(2026-03-01 10:00 UTC));
        exercise.due_date = Some(datetime!(2026-03-01 09:00 UTC));
        assert_eq!(exercise.validate(), Err(ValidationError::DueBeforeRelease(1)));
    }

    #[test]
    fn validate_bounds_working_times() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.duration_seconds = i64::MAX;
        assert_eq!(exercise.validate(), Err(ValidationError::DurationTooLong(1)));

        exercise.duration_seconds = 600;
        exercise.individual_durations.insert("extended".to_string(), MAX_WORKING_SECONDS + 1);
        assert!(matches!(
            exercise.validate(),
            Err(ValidationError::IndividualDurationOutOfRange { exercise_id: 1, .. })
        ));

        exercise.questions[2].points = -2.0;
        exercise.individual_durations.clear();
        assert_eq!(exercise.validate(), Err(ValidationError::InvalidPoints(3)));
    }

    #[test]
    fn extreme_working_times_do_not_overflow_deadlines() {
        let mut exercise = fixtures::three_question_exercise(1);
        exercise.due_date = None;
        exercise.duration_seconds = i64::MAX;
        exercise.individual_durations.insert("extended".to_string(), i64::MAX);
        let now = datetime!(2026-03-01 10:05 UTC);

        assert_eq!(exercise.default_deadline(), None);
        assert_eq!(exercise.deadline_for("extended"), None);
        assert!(!exercise.is_submission_allowed("extended", now, Duration::seconds(5)));
        assert!(!exercise.is_expired_for("extended", now, Duration::seconds(5)));
        assert!(!exercise.is_ended(now));
    }

    #[test]
    fn max_score_skips_invalid_questions() {
        let mut exercise = fixtures::three_question_exercise(1);
        assert_eq!(exercise.max_score(), 9.0);
        exercise.questions[1].invalid = true;
        assert_eq!(exercise.max_score(), 6.0);
    }
}
