use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::SubmissionRow;
use crate::models::QuizSubmission;
use crate::repositories::{RepositoryError, SubmissionRepository};

pub(crate) const COLUMNS: &str =
    "id, participation_id, answers, submitted, submission_date, submission_type, score_in_points";

pub(crate) async fn insert(
    pool: &PgPool,
    participation_id: i64,
    submission: &QuizSubmission,
) -> Result<SubmissionRow, sqlx::Error> {
    sqlx::query_as::<_, SubmissionRow>(&format!(
        "INSERT INTO quiz_submissions (
            participation_id, answers, submitted, submission_date, submission_type, score_in_points
         ) VALUES ($1,$2,$3,$4,$5,$6)
         RETURNING {COLUMNS}"
    ))
    .bind(participation_id)
    .bind(Json(&submission.submitted_answers))
    .bind(submission.submitted)
    .bind(submission.submission_date)
    .bind(submission.submission_type)
    .bind(submission.score_in_points)
    .fetch_one(pool)
    .await
}

pub(crate) async fn update(
    pool: &PgPool,
    id: i64,
    submission: &QuizSubmission,
) -> Result<SubmissionRow, sqlx::Error> {
    sqlx::query_as::<_, SubmissionRow>(&format!(
        "UPDATE quiz_submissions
         SET answers = $2,
             submitted = $3,
             submission_date = $4,
             submission_type = $5,
             score_in_points = $6
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(Json(&submission.submitted_answers))
    .bind(submission.submitted)
    .bind(submission.submission_date)
    .bind(submission.submission_type)
    .bind(submission.score_in_points)
    .fetch_one(pool)
    .await
}

pub(crate) async fn exists_for_participation(
    pool: &PgPool,
    participation_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM quiz_submissions WHERE participation_id = $1)",
    )
    .bind(participation_id)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Clone)]
pub(crate) struct PgSubmissionRepository {
    pool: PgPool,
}

impl PgSubmissionRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionRepository for PgSubmissionRepository {
    async fn save(&self, submission: &QuizSubmission) -> Result<QuizSubmission, RepositoryError> {
        let participation_id = submission
            .participation_id
            .ok_or(RepositoryError::MissingReference("submission"))?;
        let row = match submission.id {
            Some(id) => update(&self.pool, id, submission).await?,
            None => insert(&self.pool, participation_id, submission).await?,
        };
        Ok(row.into())
    }

    async fn exists_by_participation_id(
        &self,
        participation_id: i64,
    ) -> Result<bool, RepositoryError> {
        Ok(exists_for_participation(&self.pool, participation_id).await?)
    }
}
