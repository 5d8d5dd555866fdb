mod lifecycle;
mod statistics;
mod submissions;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::state::AppState;
use crate::models::QuizExercise;

pub(crate) use lifecycle::{advance_schedules, cancel, schedule};
pub(crate) use statistics::{recalculate, refresh_statistics};
pub(crate) use submissions::persist_submissions;

/// The live definition if the exercise is cached, the stored one otherwise.
/// `None` means the exercise no longer exists. A stored definition that
/// fails validation is an error, so the ticks skip it instead of scoring
/// against it.
async fn resolve_exercise(
    state: &AppState,
    exercise_id: i64,
) -> Result<Option<Arc<QuizExercise>>> {
    if let Some(exercise) = state.caches().exercises.get(exercise_id) {
        return Ok(Some(exercise));
    }
    let Some(exercise) = state
        .repos()
        .exercises
        .find_by_id(exercise_id)
        .await
        .context("Failed to load exercise")?
    else {
        return Ok(None);
    };
    exercise.validate().with_context(|| format!("Stored exercise {exercise_id} is invalid"))?;
    Ok(Some(Arc::new(exercise)))
}
