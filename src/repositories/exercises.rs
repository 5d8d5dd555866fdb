use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::db::models::ExerciseRow;
use crate::models::QuizExercise;
use crate::repositories::{ExerciseRepository, RepositoryError};

pub(crate) const COLUMNS: &str = "\
    id, course_id, title, release_date, due_date, duration_seconds, is_open_for_practice, \
    is_visible_before_start, is_planned_to_start, individual_durations, questions";

pub(crate) async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<ExerciseRow>, sqlx::Error> {
    sqlx::query_as::<_, ExerciseRow>(&format!("SELECT {COLUMNS} FROM quiz_exercises WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_schedulable(
    pool: &PgPool,
    now: OffsetDateTime,
    horizon: OffsetDateTime,
) -> Result<Vec<ExerciseRow>, sqlx::Error> {
    sqlx::query_as::<_, ExerciseRow>(&format!(
        "SELECT {COLUMNS}
         FROM quiz_exercises
         WHERE is_planned_to_start
           AND release_date IS NOT NULL
           AND release_date <= $2
           AND (latest_deadline >= $1 OR is_open_for_practice)
         ORDER BY release_date, id"
    ))
    .bind(now)
    .bind(horizon)
    .fetch_all(pool)
    .await
}

pub(crate) async fn upsert(
    pool: &PgPool,
    exercise: &QuizExercise,
) -> Result<ExerciseRow, sqlx::Error> {
    sqlx::query_as::<_, ExerciseRow>(&format!(
        "INSERT INTO quiz_exercises (
            id, course_id, title, release_date, due_date, latest_deadline, duration_seconds,
            is_open_for_practice, is_visible_before_start, is_planned_to_start,
            individual_durations, questions
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
         ON CONFLICT (id) DO UPDATE SET
            course_id = EXCLUDED.course_id,
            title = EXCLUDED.title,
            release_date = EXCLUDED.release_date,
            due_date = EXCLUDED.due_date,
            latest_deadline = EXCLUDED.latest_deadline,
            duration_seconds = EXCLUDED.duration_seconds,
            is_open_for_practice = EXCLUDED.is_open_for_practice,
            is_visible_before_start = EXCLUDED.is_visible_before_start,
            is_planned_to_start = EXCLUDED.is_planned_to_start,
            individual_durations = EXCLUDED.individual_durations,
            questions = EXCLUDED.questions,
            updated_at = now()
         RETURNING {COLUMNS}"
    ))
    .bind(exercise.id)
    .bind(exercise.course_id)
    .bind(&exercise.title)
    .bind(exercise.release_date)
    .bind(exercise.due_date)
    .bind(exercise.latest_deadline())
    .bind(exercise.duration_seconds)
    .bind(exercise.is_open_for_practice)
    .bind(exercise.is_visible_before_start)
    .bind(exercise.is_planned_to_start)
    .bind(Json(&exercise.individual_durations))
    .bind(Json(&exercise.questions))
    .fetch_one(pool)
    .await
}

#[derive(Debug, Clone)]
pub(crate) struct PgExerciseRepository {
    pool: PgPool,
}

impl PgExerciseRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExerciseRepository for PgExerciseRepository {
    async fn find_active_quizzes(
        &self,
        now: OffsetDateTime,
        lookahead: Duration,
    ) -> Result<Vec<QuizExercise>, RepositoryError> {
        let rows = list_schedulable(&self.pool, now, now.saturating_add(lookahead)).await?;
        Ok(rows.into_iter().map(QuizExercise::from).collect())
    }

    async fn find_by_id(&self, exercise_id: i64) -> Result<Option<QuizExercise>, RepositoryError> {
        Ok(find_by_id(&self.pool, exercise_id).await?.map(QuizExercise::from))
    }

    async fn save(&self, exercise: &QuizExercise) -> Result<QuizExercise, RepositoryError> {
        Ok(upsert(&self.pool, exercise).await?.into())
    }
}
