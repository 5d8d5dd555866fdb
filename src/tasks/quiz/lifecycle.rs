use std::collections::BTreeSet;

use anyhow::{Context, Result};
use time::OffsetDateTime;

use crate::cache::ScheduleState;
use crate::core::state::AppState;
use crate::core::time::format_offset;
use crate::models::QuizExercise;

/// Lifecycle tick: schedules quizzes that are about to start, starts those
/// whose release date has passed and stops those that are over and fully
/// persisted.
pub(crate) async fn advance_schedules(state: &AppState, now: OffsetDateTime) -> Result<()> {
    let caches = state.caches();
    let lookahead = state.settings().engine().schedule_lookahead();

    let active = state
        .repos()
        .exercises
        .find_active_quizzes(now, lookahead)
        .await
        .context("Failed to load active quizzes")?;

    let mut listed = BTreeSet::new();
    for exercise in active {
        listed.insert(exercise.id);
        if caches.schedules.state(exercise.id) != ScheduleState::NotScheduled {
            continue;
        }
        if let Err(err) = exercise.validate() {
            tracing::warn!(exercise_id = exercise.id, error = %err, "Skipping invalid quiz");
            continue;
        }
        schedule(state, exercise, now);
    }

    for (exercise_id, schedule_state) in caches.schedules.active() {
        if !listed.contains(&exercise_id) {
            let stored = state
                .repos()
                .exercises
                .find_by_id(exercise_id)
                .await
                .context("Failed to look up scheduled quiz")?;
            if stored.is_none() {
                tracing::info!(exercise_id, "Scheduled quiz was deleted; cancelling");
                cancel(state, exercise_id);
                continue;
            }
        }

        let Some(exercise) = caches.exercises.get(exercise_id) else {
            continue;
        };
        match schedule_state {
            ScheduleState::Scheduled if exercise.is_started(now) => {
                let (from, to) = (ScheduleState::Scheduled, ScheduleState::Running);
                if caches.schedules.transition(exercise_id, from, to) {
                    tracing::info!(exercise_id, "Quiz is live");
                }
            }
            ScheduleState::Running
                if exercise.is_ended(now)
                    && !exercise.is_open_for_practice
                    && caches.is_drained(exercise_id) =>
            {
                let (from, to) = (ScheduleState::Running, ScheduleState::Stopped);
                if caches.schedules.transition(exercise_id, from, to) {
                    caches.evict_exercise(exercise_id);
                    tracing::info!(exercise_id, "Quiz finished; evicted from the live caches");
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Loads `exercise` into the live caches. An exercise already inside its
/// window starts running immediately.
pub(crate) fn schedule(
    state: &AppState,
    exercise: QuizExercise,
    now: OffsetDateTime,
) -> ScheduleState {
    let caches = state.caches();
    let exercise = caches.exercises.update(exercise);
    let schedule_state = if exercise.is_started(now) {
        ScheduleState::Running
    } else {
        ScheduleState::Scheduled
    };
    caches.schedules.set(exercise.id, schedule_state);
    tracing::info!(
        exercise_id = exercise.id,
        state = schedule_state.as_str(),
        release_date = %exercise.release_date.map(format_offset).unwrap_or_default(),
        "Scheduled quiz"
    );
    schedule_state
}

/// Drops the exercise and everything cached for it. Writes already under
/// way are allowed to finish.
pub(crate) fn cancel(state: &AppState, exercise_id: i64) {
    let caches = state.caches();
    caches.evict_exercise(exercise_id);
    caches.schedules.remove(exercise_id);
}
