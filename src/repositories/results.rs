use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::{ResultRow, ScoredSubmissionRow};
use crate::models::{QuizResult, ScoredSubmission};
use crate::repositories::{RepositoryError, ResultRepository};

pub(crate) const COLUMNS: &str = "\
    id, participation_id, submission_id, score, score_in_points, rated, completion_date, \
    assessment_type";

pub(crate) async fn insert(
    pool: &PgPool,
    participation_id: i64,
    submission_id: i64,
    result: &QuizResult,
) -> Result<ResultRow, sqlx::Error> {
    sqlx::query_as::<_, ResultRow>(&format!(
        "INSERT INTO quiz_results (
            participation_id, submission_id, score, score_in_points, rated, completion_date,
            assessment_type
         ) VALUES ($1,$2,$3,$4,$5,$6,$7)
         RETURNING {COLUMNS}"
    ))
    .bind(participation_id)
    .bind(submission_id)
    .bind(result.score)
    .bind(result.score_in_points)
    .bind(result.rated)
    .bind(result.completion_date)
    .bind(result.assessment_type)
    .fetch_one(pool)
    .await
}

pub(crate) async fn update_score(
    pool: &PgPool,
    id: i64,
    result: &QuizResult,
) -> Result<ResultRow, sqlx::Error> {
    sqlx::query_as::<_, ResultRow>(&format!(
        "UPDATE quiz_results
         SET score = $2, score_in_points = $3, rated = $4, completion_date = $5
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(result.score)
    .bind(result.score_in_points)
    .bind(result.rated)
    .bind(result.completion_date)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_rated_by_exercise(
    pool: &PgPool,
    exercise_id: i64,
) -> Result<Vec<ResultRow>, sqlx::Error> {
    sqlx::query_as::<_, ResultRow>(
        "SELECT r.id, r.participation_id, r.submission_id, r.score, r.score_in_points, r.rated,
                r.completion_date, r.assessment_type
         FROM quiz_results r
         JOIN participations p ON p.id = r.participation_id
         WHERE p.exercise_id = $1 AND r.rated
         ORDER BY r.id",
    )
    .bind(exercise_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_with_submissions_by_exercise(
    pool: &PgPool,
    exercise_id: i64,
) -> Result<Vec<ScoredSubmissionRow>, sqlx::Error> {
    sqlx::query_as::<_, ScoredSubmissionRow>(
        "SELECT r.id, r.participation_id, r.submission_id, r.score, r.score_in_points, r.rated,
                r.completion_date, r.assessment_type,
                p.username,
                s.answers, s.submitted, s.submission_date, s.submission_type,
                s.score_in_points AS submission_score_in_points
         FROM quiz_results r
         JOIN participations p ON p.id = r.participation_id
         JOIN quiz_submissions s ON s.id = r.submission_id
         WHERE p.exercise_id = $1
         ORDER BY r.id",
    )
    .bind(exercise_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_latest_for_participant(
    pool: &PgPool,
    exercise_id: i64,
    username: &str,
) -> Result<Option<ResultRow>, sqlx::Error> {
    sqlx::query_as::<_, ResultRow>(
        "SELECT r.id, r.participation_id, r.submission_id, r.score, r.score_in_points, r.rated,
                r.completion_date, r.assessment_type
         FROM quiz_results r
         JOIN participations p ON p.id = r.participation_id
         WHERE p.exercise_id = $1 AND p.username = $2
         ORDER BY r.completion_date DESC NULLS LAST, r.id DESC
         LIMIT 1",
    )
    .bind(exercise_id)
    .bind(username)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Clone)]
pub(crate) struct PgResultRepository {
    pool: PgPool,
}

impl PgResultRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn save(&self, result: &QuizResult) -> Result<QuizResult, RepositoryError> {
        let row = match result.id {
            Some(id) => update_score(&self.pool, id, result).await?,
            None => {
                let participation_id =
                    result.participation_id.ok_or(RepositoryError::MissingReference("result"))?;
                let submission_id =
                    result.submission_id.ok_or(RepositoryError::MissingReference("result"))?;
                insert(&self.pool, participation_id, submission_id, result).await?
            }
        };
        Ok(row.into())
    }

    async fn find_rated_results_for_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<QuizResult>, RepositoryError> {
        let rows = list_rated_by_exercise(&self.pool, exercise_id).await?;
        Ok(rows.into_iter().map(QuizResult::from).collect())
    }

    async fn find_with_submissions_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<ScoredSubmission>, RepositoryError> {
        let rows = list_with_submissions_by_exercise(&self.pool, exercise_id).await?;
        Ok(rows.into_iter().map(ScoredSubmission::from).collect())
    }

    async fn find_latest_for_participant(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<QuizResult>, RepositoryError> {
        Ok(find_latest_for_participant(&self.pool, exercise_id, username)
            .await?
            .map(QuizResult::from))
    }
}
