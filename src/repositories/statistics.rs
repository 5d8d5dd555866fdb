use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::QuizStatistics;
use crate::repositories::{RepositoryError, StatisticsRepository};

pub(crate) async fn upsert(
    pool: &PgPool,
    exercise_id: i64,
    payload: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO quiz_statistics (exercise_id, payload, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (exercise_id) DO UPDATE SET
            payload = EXCLUDED.payload,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(exercise_id)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn find_payload(
    pool: &PgPool,
    exercise_id: i64,
) -> Result<Option<Json<QuizStatistics>>, sqlx::Error> {
    sqlx::query_scalar::<_, Json<QuizStatistics>>(
        "SELECT payload FROM quiz_statistics WHERE exercise_id = $1",
    )
    .bind(exercise_id)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Clone)]
pub(crate) struct PgStatisticsRepository {
    pool: PgPool,
}

impl PgStatisticsRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatisticsRepository for PgStatisticsRepository {
    async fn save(&self, statistics: &QuizStatistics) -> Result<(), RepositoryError> {
        let payload = serde_json::to_value(statistics)
            .map_err(|source| RepositoryError::Serialization { entity: "statistics", source })?;
        upsert(&self.pool, statistics.exercise_id, payload).await?;
        Ok(())
    }

    async fn find_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Option<QuizStatistics>, RepositoryError> {
        Ok(find_payload(&self.pool, exercise_id).await?.map(|payload| payload.0))
    }
}
