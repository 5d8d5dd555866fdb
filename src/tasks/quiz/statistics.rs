use anyhow::{Context, Result};

use crate::cache::Staleness;
use crate::core::state::AppState;
use crate::models::{QuizExercise, QuizStatistics};
use crate::repositories::RepositoryError;
use crate::services::re_evaluation;
use crate::services::statistics::LiveStatistics;

use super::resolve_exercise;

/// Slow tick: recounts the statistics of every dirty exercise.
///
/// Exercises with live counters and only new results are updated from the
/// backlog; edited exercises, and exercises without counters yet, are rebuilt
/// from storage. A failed exercise is marked dirty again and retried on the
/// next tick without holding up the others.
pub(crate) async fn refresh_statistics(state: &AppState) -> Result<()> {
    let _guard = state.rebuild_lock().lock().await;
    let caches = state.caches();
    let mut refreshed = 0_usize;

    for exercise_id in caches.dirty.ids() {
        let Some(staleness) = caches.dirty.take(exercise_id) else {
            continue;
        };
        match refresh_one(state, exercise_id, staleness).await {
            Ok(()) => refreshed += 1,
            Err(err) => {
                caches.dirty.mark(exercise_id, staleness);
                tracing::error!(exercise_id, error = %err, "Failed to refresh quiz statistics");
            }
        }
    }

    if refreshed > 0 {
        tracing::info!(refreshed, "Refreshed quiz statistics");
    }
    Ok(())
}

/// Full rebuild on demand, bypassing the dirty set. Pending re-evaluation
/// from an edit is carried out as part of it.
pub(crate) async fn recalculate(
    state: &AppState,
    exercise: &QuizExercise,
) -> Result<QuizStatistics, RepositoryError> {
    let _guard = state.rebuild_lock().lock().await;
    let caches = state.caches();
    let staleness = caches.dirty.take(exercise.id);

    let rebuilt = rebuild(state, exercise, staleness == Some(Staleness::Edited)).await;
    let outcome = match rebuilt {
        Ok(live) => store(state, exercise.id, live).await,
        Err(err) => Err(err),
    };
    if outcome.is_err() {
        if let Some(staleness) = staleness {
            caches.dirty.mark(exercise.id, staleness);
        }
    }
    outcome
}

async fn refresh_one(state: &AppState, exercise_id: i64, staleness: Staleness) -> Result<()> {
    let caches = state.caches();
    let Some(exercise) = resolve_exercise(state, exercise_id).await? else {
        caches.backlog.take(exercise_id);
        caches.statistics.remove(exercise_id);
        return Ok(());
    };

    let live = match (staleness, caches.statistics.get(exercise_id)) {
        (Staleness::NewResults, Some(mut live)) => {
            let engine = state.statistics();
            let backlog = caches.backlog.take(exercise_id);
            let applied = backlog
                .iter()
                .filter(|scored| engine.apply(&mut live, &exercise, scored))
                .count();
            metrics::counter!("quiz_statistics_rebuilds_total", "mode" => "incremental")
                .increment(1);
            tracing::debug!(exercise_id, applied, "Applied new results to quiz statistics");
            live
        }
        (staleness, _) => rebuild(state, &exercise, staleness == Staleness::Edited)
            .await
            .context("Failed to rebuild quiz statistics")?,
    };

    store(state, exercise_id, live).await.context("Failed to store quiz statistics")?;
    Ok(())
}

async fn rebuild(
    state: &AppState,
    exercise: &QuizExercise,
    re_evaluate: bool,
) -> Result<LiveStatistics, RepositoryError> {
    let caches = state.caches();
    let repos = state.repos();

    // Anything persisted from here on is in the backlog as well as possibly
    // in the query below; counting skips results seen twice.
    caches.backlog.take(exercise.id);
    let rows = if re_evaluate {
        re_evaluation::re_evaluate(state, exercise).await?
    } else {
        repos.results.find_with_submissions_by_exercise(exercise.id).await?
    };

    let engine = state.statistics();
    let live = engine.rebuild(exercise, &rows);
    metrics::counter!("quiz_statistics_rebuilds_total", "mode" => "full").increment(1);

    let counted_rated = engine.snapshot(&live).participants_rated;
    match repos.results.find_rated_results_for_exercise(exercise.id).await {
        Ok(rated) if rated.len() as u64 != counted_rated => tracing::warn!(
            exercise_id = exercise.id,
            stored = rated.len(),
            counted = counted_rated,
            "Rated result count changed during statistics rebuild"
        ),
        Ok(_) => {}
        Err(err) => tracing::warn!(
            exercise_id = exercise.id,
            error = %err,
            "Failed to cross-check rated results"
        ),
    }

    tracing::info!(
        exercise_id = exercise.id,
        results = rows.len(),
        re_evaluate,
        "Rebuilt quiz statistics"
    );
    Ok(live)
}

async fn store(
    state: &AppState,
    exercise_id: i64,
    live: LiveStatistics,
) -> Result<QuizStatistics, RepositoryError> {
    let snapshot = state.statistics().snapshot(&live);
    state.caches().statistics.put(exercise_id, live);
    state.repos().statistics.save(&snapshot).await?;
    Ok(snapshot)
}
