use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::types::AssessmentType;
use crate::models::submission::QuizSubmission;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub id: Option<i64>,
    pub participation_id: Option<i64>,
    pub submission_id: Option<i64>,
    /// Percentage of the exercise's max score, 0..=100.
    pub score: f64,
    pub score_in_points: f64,
    pub rated: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completion_date: Option<OffsetDateTime>,
    pub assessment_type: AssessmentType,
}

/// A persisted result together with the submission it evaluates.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSubmission {
    pub username: String,
    pub result: QuizResult,
    pub submission: QuizSubmission,
}

impl QuizResult {
    pub(crate) fn automatic(score_in_points: f64, max_score: f64, rated: bool) -> Self {
        Self {
            id: None,
            participation_id: None,
            submission_id: None,
            score: percentage(score_in_points, max_score),
            score_in_points,
            rated,
            completion_date: None,
            assessment_type: AssessmentType::Automatic,
        }
    }

    pub(crate) fn rescore(&mut self, score_in_points: f64, max_score: f64) {
        self.score_in_points = score_in_points;
        self.score = percentage(score_in_points, max_score);
    }
}

pub(crate) fn percentage(score_in_points: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    (score_in_points / max_score * 100.0).clamp(0.0, 100.0)
}
