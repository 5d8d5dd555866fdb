use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::types::InitializationState;
use crate::models::result::QuizResult;
use crate::models::submission::QuizSubmission;

/// Links a participant to an exercise. During the live window it carries at
/// most one submission and one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub id: Option<i64>,
    pub exercise_id: i64,
    pub username: String,
    pub initialization_state: InitializationState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub initialization_date: Option<OffsetDateTime>,
    pub submission: Option<QuizSubmission>,
    pub result: Option<QuizResult>,
}

impl Participation {
    pub fn new(exercise_id: i64, username: impl Into<String>) -> Self {
        Self {
            id: None,
            exercise_id,
            username: username.into(),
            initialization_state: InitializationState::Initialized,
            initialization_date: None,
            submission: None,
            result: None,
        }
    }
}
