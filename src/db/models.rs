use std::collections::BTreeMap;

use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::{AssessmentType, InitializationState, SubmissionType};
use crate::models::{
    Participation, QuizExercise, QuizQuestion, QuizResult, QuizSubmission, ScoredSubmission,
    SubmittedAnswer,
};

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ExerciseRow {
    pub(crate) id: i64,
    pub(crate) course_id: i64,
    pub(crate) title: String,
    pub(crate) release_date: Option<OffsetDateTime>,
    pub(crate) due_date: Option<OffsetDateTime>,
    pub(crate) duration_seconds: i64,
    pub(crate) is_open_for_practice: bool,
    pub(crate) is_visible_before_start: bool,
    pub(crate) is_planned_to_start: bool,
    pub(crate) individual_durations: Json<BTreeMap<String, i64>>,
    pub(crate) questions: Json<Vec<QuizQuestion>>,
}

impl From<ExerciseRow> for QuizExercise {
    fn from(row: ExerciseRow) -> Self {
        Self {
            id: row.id,
            course_id: row.course_id,
            title: row.title,
            release_date: row.release_date,
            due_date: row.due_date,
            duration_seconds: row.duration_seconds,
            is_open_for_practice: row.is_open_for_practice,
            is_visible_before_start: row.is_visible_before_start,
            is_planned_to_start: row.is_planned_to_start,
            individual_durations: row.individual_durations.0,
            questions: row.questions.0,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ParticipationRow {
    pub(crate) id: i64,
    pub(crate) exercise_id: i64,
    pub(crate) username: String,
    pub(crate) initialization_state: InitializationState,
    pub(crate) initialization_date: Option<OffsetDateTime>,
}

impl From<ParticipationRow> for Participation {
    fn from(row: ParticipationRow) -> Self {
        Self {
            id: Some(row.id),
            exercise_id: row.exercise_id,
            username: row.username,
            initialization_state: row.initialization_state,
            initialization_date: row.initialization_date,
            submission: None,
            result: None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SubmissionRow {
    pub(crate) id: i64,
    pub(crate) participation_id: i64,
    pub(crate) answers: Json<Vec<SubmittedAnswer>>,
    pub(crate) submitted: bool,
    pub(crate) submission_date: Option<OffsetDateTime>,
    pub(crate) submission_type: Option<SubmissionType>,
    pub(crate) score_in_points: Option<f64>,
}

impl From<SubmissionRow> for QuizSubmission {
    fn from(row: SubmissionRow) -> Self {
        Self {
            id: Some(row.id),
            participation_id: Some(row.participation_id),
            submitted_answers: row.answers.0,
            submitted: row.submitted,
            submission_date: row.submission_date,
            submission_type: row.submission_type,
            score_in_points: row.score_in_points,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ResultRow {
    pub(crate) id: i64,
    pub(crate) participation_id: i64,
    pub(crate) submission_id: i64,
    pub(crate) score: f64,
    pub(crate) score_in_points: f64,
    pub(crate) rated: bool,
    pub(crate) completion_date: Option<OffsetDateTime>,
    pub(crate) assessment_type: AssessmentType,
}

impl From<ResultRow> for QuizResult {
    fn from(row: ResultRow) -> Self {
        Self {
            id: Some(row.id),
            participation_id: Some(row.participation_id),
            submission_id: Some(row.submission_id),
            score: row.score,
            score_in_points: row.score_in_points,
            rated: row.rated,
            completion_date: row.completion_date,
            assessment_type: row.assessment_type,
        }
    }
}

/// A result joined with its submission and the participant's username.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ScoredSubmissionRow {
    #[sqlx(flatten)]
    pub(crate) result: ResultRow,
    pub(crate) username: String,
    pub(crate) answers: Json<Vec<SubmittedAnswer>>,
    pub(crate) submitted: bool,
    pub(crate) submission_date: Option<OffsetDateTime>,
    pub(crate) submission_type: Option<SubmissionType>,
    pub(crate) submission_score_in_points: Option<f64>,
}

impl From<ScoredSubmissionRow> for ScoredSubmission {
    fn from(row: ScoredSubmissionRow) -> Self {
        let submission = QuizSubmission {
            id: Some(row.result.submission_id),
            participation_id: Some(row.result.participation_id),
            submitted_answers: row.answers.0,
            submitted: row.submitted,
            submission_date: row.submission_date,
            submission_type: row.submission_type,
            score_in_points: row.submission_score_in_points,
        };
        Self { username: row.username, result: row.result.into(), submission }
    }
}
