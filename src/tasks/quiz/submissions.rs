use anyhow::Result;
use time::OffsetDateTime;

use crate::cache::{PendingPersist, Staleness};
use crate::core::state::AppState;
use crate::db::types::SubmissionType;
use crate::models::{Participation, QuizExercise, QuizResult, QuizSubmission, ScoredSubmission};
use crate::repositories::RepositoryError;
use crate::services::scoring::{self, ScoreBreakdown};

use super::resolve_exercise;

/// Fast tick: claims final and expired submissions from the cache, scores
/// them and writes participation, submission and result rows.
///
/// Claimed submissions stay in the persist queue until all rows are stored,
/// so a failed write is retried on the next tick instead of being lost.
pub(crate) async fn persist_submissions(state: &AppState, now: OffsetDateTime) -> Result<()> {
    let _guard = state.persist_lock().lock().await;
    let caches = state.caches();
    let grace = state.settings().engine().submit_grace();

    let mut exercise_ids = caches.submissions.exercise_ids();
    exercise_ids.extend(caches.pending.exercise_ids());

    let mut persisted = 0_usize;
    let mut failed = 0_usize;

    for exercise_id in exercise_ids {
        let exercise = match resolve_exercise(state, exercise_id).await {
            Ok(Some(exercise)) => exercise,
            Ok(None) => {
                tracing::warn!(exercise_id, "Dropping cached submissions of a deleted exercise");
                caches.evict_exercise(exercise_id);
                caches.schedules.remove(exercise_id);
                continue;
            }
            Err(err) => {
                tracing::error!(
                    exercise_id,
                    error = %err,
                    "Failed to load exercise for persisting"
                );
                continue;
            }
        };

        caches.claim_for_persist(&exercise, now, grace);

        for (username, pending) in caches.pending.all_for_exercise(exercise_id) {
            if persist_one(state, &exercise, &username, pending).await {
                persisted += 1;
            } else {
                failed += 1;
            }
        }
    }

    metrics::gauge!("quiz_cached_submissions").set(caches.submissions.len() as f64);
    metrics::gauge!("quiz_live_exercises").set(caches.exercises.len() as f64);

    if persisted > 0 || failed > 0 {
        tracing::info!(persisted, failed, "Persisted quiz submissions");
    }

    Ok(())
}

async fn persist_one(
    state: &AppState,
    exercise: &QuizExercise,
    username: &str,
    mut pending: PendingPersist,
) -> bool {
    let caches = state.caches();
    let exercise_id = exercise.id;

    match write_rows(state, exercise, username, &mut pending).await {
        Ok(scored) => {
            let mut participation = pending
                .participation
                .unwrap_or_else(|| Participation::new(exercise_id, username));
            participation.submission = Some(scored.submission.clone());
            participation.result = Some(scored.result.clone());

            // The result must be visible before the queue entry disappears,
            // otherwise a resubmission could slip through in between.
            caches.results.put(exercise_id, username, scored.result.clone());
            caches.participations.put(exercise_id, username, participation);
            caches.pending.remove(exercise_id, username);

            let kind = scored
                .submission
                .submission_type
                .map(SubmissionType::as_str)
                .unwrap_or("manual");
            metrics::counter!("quiz_submissions_persisted_total", "type" => kind).increment(1);

            caches.backlog.push(exercise_id, scored);
            caches.dirty.mark(exercise_id, Staleness::NewResults);
            true
        }
        Err(err) => {
            metrics::counter!("quiz_persist_failures_total").increment(1);
            pending.attempts += 1;
            let max_attempts = state.settings().engine().persist_max_attempts;
            if pending.attempts >= max_attempts {
                caches.pending.remove(exercise_id, username);
                metrics::counter!("quiz_submissions_lost_total").increment(1);
                tracing::error!(
                    exercise_id,
                    username,
                    attempts = pending.attempts,
                    error = %err,
                    "Giving up on persisting quiz submission"
                );
            } else {
                tracing::warn!(
                    exercise_id,
                    username,
                    attempts = pending.attempts,
                    error = %err,
                    "Failed to persist quiz submission; retrying next tick"
                );
                caches.pending.put(exercise_id, username, pending);
            }
            false
        }
    }
}

/// Writes the rows of one claimed submission. Rows stored before a failure
/// are remembered on `pending`, so a retry updates instead of duplicating.
async fn write_rows(
    state: &AppState,
    exercise: &QuizExercise,
    username: &str,
    pending: &mut PendingPersist,
) -> Result<ScoredSubmission, RepositoryError> {
    let participation_id = match pending.participation.as_ref().and_then(|p| p.id) {
        Some(id) => id,
        None => {
            let participation = find_or_create_participation(state, exercise.id, username).await?;
            let id = participation.id.ok_or(RepositoryError::MissingReference("participation"))?;
            pending.participation = Some(participation);
            id
        }
    };

    let breakdown = scoring::score_submission(&pending.submission, exercise).unwrap_or_else(|err| {
        tracing::warn!(
            exercise_id = exercise.id,
            username,
            error = %err,
            "Malformed submission scored as zero"
        );
        metrics::counter!("quiz_scoring_errors_total").increment(1);
        ScoreBreakdown::zero(exercise)
    });

    let mut submission = pending.submission.clone();
    submission.participation_id = Some(participation_id);
    scoring::apply_scores(&mut submission, &breakdown);
    let submission = state.repos().submissions.save(&submission).await?;
    pending.submission = submission.clone();

    let rated = is_rated(exercise, username, &submission);
    let mut result = QuizResult::automatic(breakdown.total, exercise.max_score(), rated);
    result.participation_id = Some(participation_id);
    result.submission_id = submission.id;
    result.completion_date = submission.submission_date;
    let result = state.repos().results.save(&result).await?;

    Ok(ScoredSubmission { username: username.to_string(), result, submission })
}

async fn find_or_create_participation(
    state: &AppState,
    exercise_id: i64,
    username: &str,
) -> Result<Participation, RepositoryError> {
    let repos = state.repos();
    if let Some(participation) =
        repos.participations.find_by_exercise_and_username(exercise_id, username).await?
    {
        return Ok(participation);
    }

    let mut participation = state
        .caches()
        .participations
        .get(exercise_id, username)
        .unwrap_or_else(|| Participation::new(exercise_id, username));
    participation.id = None;
    participation.submission = None;
    participation.result = None;
    repos.participations.save(&participation).await
}

/// Rated iff the submission was made on time by hand. Timeouts, late
/// practice attempts and submissions without a date are unrated.
fn is_rated(exercise: &QuizExercise, username: &str, submission: &QuizSubmission) -> bool {
    if submission.submission_type == Some(SubmissionType::Timeout) {
        return false;
    }
    match (submission.submission_date, exercise.deadline_for(username)) {
        (Some(date), Some(deadline)) => date <= deadline,
        _ => false,
    }
}
