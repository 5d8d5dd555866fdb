//! Durable-storage collaborators of the live engine.
//!
//! The engine only talks to these traits; `Repositories::postgres` wires the
//! sqlx implementations, tests wire in-memory ones.

pub(crate) mod course_memberships;
pub(crate) mod exercises;
pub(crate) mod participations;
pub(crate) mod results;
pub(crate) mod statistics;
pub(crate) mod submissions;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::models::{
    Participation, QuizExercise, QuizResult, QuizStatistics, QuizSubmission, ScoredSubmission,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode {entity}: {source}")]
    Serialization {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} references a row that was never stored")]
    MissingReference(&'static str),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ExerciseRepository: Send + Sync {
    /// Quizzes planned to start that are released before `now + lookahead`
    /// and still accept submissions (or are open for practice).
    async fn find_active_quizzes(
        &self,
        now: OffsetDateTime,
        lookahead: Duration,
    ) -> Result<Vec<QuizExercise>, RepositoryError>;

    async fn find_by_id(&self, exercise_id: i64) -> Result<Option<QuizExercise>, RepositoryError>;

    async fn save(&self, exercise: &QuizExercise) -> Result<QuizExercise, RepositoryError>;
}

#[async_trait]
pub trait ParticipationRepository: Send + Sync {
    async fn find_by_exercise_and_username(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<Participation>, RepositoryError>;

    /// Stores the participation row; nested submission and result are not
    /// written.
    async fn save(&self, participation: &Participation) -> Result<Participation, RepositoryError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn save(&self, submission: &QuizSubmission) -> Result<QuizSubmission, RepositoryError>;

    async fn exists_by_participation_id(
        &self,
        participation_id: i64,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn save(&self, result: &QuizResult) -> Result<QuizResult, RepositoryError>;

    async fn find_rated_results_for_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<QuizResult>, RepositoryError>;

    async fn find_with_submissions_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<ScoredSubmission>, RepositoryError>;

    async fn find_latest_for_participant(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<QuizResult>, RepositoryError>;
}

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    async fn save(&self, statistics: &QuizStatistics) -> Result<(), RepositoryError>;

    async fn find_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Option<QuizStatistics>, RepositoryError>;
}

#[async_trait]
pub trait AuthorizationCheck: Send + Sync {
    async fn is_at_least_student(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError>;

    async fn is_at_least_tutor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError>;

    async fn is_at_least_instructor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError>;
}

#[derive(Clone)]
pub struct Repositories {
    pub exercises: Arc<dyn ExerciseRepository>,
    pub participations: Arc<dyn ParticipationRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
    pub authorization: Arc<dyn AuthorizationCheck>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            exercises: Arc::new(exercises::PgExerciseRepository::new(pool.clone())),
            participations: Arc::new(participations::PgParticipationRepository::new(pool.clone())),
            submissions: Arc::new(submissions::PgSubmissionRepository::new(pool.clone())),
            results: Arc::new(results::PgResultRepository::new(pool.clone())),
            statistics: Arc::new(statistics::PgStatisticsRepository::new(pool.clone())),
            authorization: Arc::new(course_memberships::PgAuthorizationCheck::new(pool)),
        }
    }
}
