use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::ParticipationRow;
use crate::models::Participation;
use crate::repositories::{ParticipationRepository, RepositoryError};

pub(crate) const COLUMNS: &str =
    "id, exercise_id, username, initialization_state, initialization_date";

pub(crate) async fn find_by_exercise_and_username(
    pool: &PgPool,
    exercise_id: i64,
    username: &str,
) -> Result<Option<ParticipationRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipationRow>(&format!(
        "SELECT {COLUMNS}
         FROM participations
         WHERE exercise_id = $1 AND username = $2"
    ))
    .bind(exercise_id)
    .bind(username)
    .fetch_optional(pool)
    .await
}

/// Inserts or updates the row for (exercise, username). A second insert for
/// the same pair updates the existing row instead of failing.
pub(crate) async fn upsert(
    pool: &PgPool,
    participation: &Participation,
) -> Result<ParticipationRow, sqlx::Error> {
    sqlx::query_as::<_, ParticipationRow>(&format!(
        "INSERT INTO participations
            (exercise_id, username, initialization_state, initialization_date)
         VALUES ($1,$2,$3,$4)
         ON CONFLICT (exercise_id, username) DO UPDATE SET
            initialization_state = EXCLUDED.initialization_state,
            initialization_date =
                COALESCE(participations.initialization_date, EXCLUDED.initialization_date)
         RETURNING {COLUMNS}"
    ))
    .bind(participation.exercise_id)
    .bind(&participation.username)
    .bind(participation.initialization_state)
    .bind(participation.initialization_date)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Clone)]
pub(crate) struct PgParticipationRepository {
    pool: PgPool,
}

impl PgParticipationRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipationRepository for PgParticipationRepository {
    async fn find_by_exercise_and_username(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<Participation>, RepositoryError> {
        let row = find_by_exercise_and_username(&self.pool, exercise_id, username).await?;
        Ok(row.map(Participation::from))
    }

    async fn save(&self, participation: &Participation) -> Result<Participation, RepositoryError> {
        let row = upsert(&self.pool, participation).await?;
        let mut saved = Participation::from(row);
        saved.submission = participation.submission.clone();
        saved.result = participation.result.clone();
        Ok(saved)
    }
}
