//! Accepts interim saves and final submissions into the submission cache.
//!
//! Nothing here writes to storage; the fast tick persists what is cached.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;

use crate::core::state::AppState;
use crate::db::types::SubmissionType;
use crate::models::{Participation, QuizExercise, QuizSubmission, ValidationError};
use crate::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("exercise {0} does not exist")]
    NotFound(i64),
    #[error("exercise {0} does not accept submissions right now")]
    InactiveExercise(i64),
    #[error("{username} already submitted exercise {exercise_id}")]
    AlreadySubmitted { exercise_id: i64, username: String },
    #[error("{username} may not participate in exercise {exercise_id}")]
    AccessForbidden { exercise_id: i64, username: String },
    #[error("{username}'s live submission to exercise {exercise_id} is still being stored")]
    StillPersisting { exercise_id: i64, username: String },
    #[error(transparent)]
    InvalidExercise(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SubmissionError {
    fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InactiveExercise(_) => "inactive",
            Self::AlreadySubmitted { .. } => "already_submitted",
            Self::AccessForbidden { .. } => "forbidden",
            Self::StillPersisting { .. } => "still_persisting",
            Self::InvalidExercise(_) => "invalid_exercise",
            Self::Repository(_) => "repository",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Live,
    Practice,
}

pub(crate) async fn submit(
    state: &AppState,
    exercise_id: i64,
    submission: QuizSubmission,
    username: &str,
    is_final: bool,
    now: OffsetDateTime,
) -> Result<QuizSubmission, SubmissionError> {
    let result = accept(state, exercise_id, submission, username, is_final, now).await;
    match &result {
        Ok(_) => {
            let kind = if is_final { "submit" } else { "save" };
            metrics::counter!("quiz_submissions_ingested_total", "kind" => kind).increment(1);
        }
        Err(err) => {
            metrics::counter!("quiz_submissions_rejected_total", "reason" => err.reason())
                .increment(1);
            tracing::debug!(exercise_id, username, error = %err, "Submission rejected");
        }
    }
    result
}

async fn accept(
    state: &AppState,
    exercise_id: i64,
    mut submission: QuizSubmission,
    username: &str,
    is_final: bool,
    now: OffsetDateTime,
) -> Result<QuizSubmission, SubmissionError> {
    let exercise = load_exercise(state, exercise_id).await?;

    let allowed =
        state.repos().authorization.is_at_least_student(exercise.course_id, username).await?;
    if !allowed {
        return Err(SubmissionError::AccessForbidden {
            exercise_id,
            username: username.to_string(),
        });
    }

    let grace = state.settings().engine().submit_grace();
    let admission = admit(&exercise, username, is_final, now, grace)?;
    if admission == Admission::Live {
        ensure_not_submitted(state, exercise_id, username).await?;
    }

    submission.id = None;
    submission.participation_id = None;
    submission.score_in_points = None;
    for answer in &mut submission.submitted_answers {
        answer.score_in_points = None;
    }
    submission.submitted = is_final;
    submission.submission_type = is_final.then_some(SubmissionType::Manual);
    // Inside the grace period the submission counts as made at the deadline.
    let deadline = exercise.deadline_for(username);
    submission.submission_date = Some(match deadline {
        Some(deadline) if admission == Admission::Live && now > deadline => deadline,
        _ => now,
    });

    let caches = state.caches();
    caches.submissions.put_guarded(exercise_id, username, submission.clone(), |current| {
        if admission == Admission::Practice {
            // A live attempt the fast tick has not claimed yet is queued
            // first; the practice attempt then waits behind it.
            let Some(live) = current.filter(|cached| made_before(cached, deadline)) else {
                return Ok(());
            };
            if caches.pending.contains(exercise_id, username) {
                return Err(SubmissionError::StillPersisting {
                    exercise_id,
                    username: username.to_string(),
                });
            }
            caches.enqueue(exercise_id, username, live.clone(), now);
            return Ok(());
        }
        let cached_final = current.is_some_and(|cached| cached.submitted);
        let persisting = caches.pending.contains(exercise_id, username);
        let finished = caches
            .results
            .get(exercise_id, username)
            .is_some_and(|result| result.completion_date.is_some());
        if cached_final || persisting || finished {
            return Err(SubmissionError::AlreadySubmitted {
                exercise_id,
                username: username.to_string(),
            });
        }
        Ok(())
    })?;

    caches.participations.upsert(
        exercise_id,
        username,
        || {
            let mut participation = Participation::new(exercise_id, username);
            participation.initialization_date = Some(now);
            participation.submission = Some(submission.clone());
            participation
        },
        |participation| participation.submission = Some(submission.clone()),
    );

    tracing::debug!(
        exercise_id,
        username,
        submitted = submission.submitted,
        practice = admission == Admission::Practice,
        "Submission cached"
    );
    Ok(submission)
}

/// The cached definition when the exercise is live, storage otherwise.
/// Stored definitions are validated before use.
pub(crate) async fn load_exercise(
    state: &AppState,
    exercise_id: i64,
) -> Result<Arc<QuizExercise>, SubmissionError> {
    if let Some(exercise) = state.caches().exercises.get(exercise_id) {
        return Ok(exercise);
    }
    let exercise = state
        .repos()
        .exercises
        .find_by_id(exercise_id)
        .await?
        .ok_or(SubmissionError::NotFound(exercise_id))?;
    exercise.validate()?;
    Ok(Arc::new(exercise))
}

fn made_before(submission: &QuizSubmission, deadline: Option<OffsetDateTime>) -> bool {
    match (submission.submission_date, deadline) {
        (Some(date), Some(deadline)) => date <= deadline,
        _ => true,
    }
}

fn admit(
    exercise: &QuizExercise,
    username: &str,
    is_final: bool,
    now: OffsetDateTime,
    grace: time::Duration,
) -> Result<Admission, SubmissionError> {
    if exercise.is_submission_allowed(username, now, grace) {
        return Ok(Admission::Live);
    }
    if is_final && exercise.is_open_for_practice && exercise.is_ended_for(username, now) {
        return Ok(Admission::Practice);
    }
    Err(SubmissionError::InactiveExercise(exercise.id))
}

/// Rejects users who already have a completed result. Storage is consulted
/// only on a user's first contact with the exercise in this process; after
/// that every completed result is mirrored in the result cache.
async fn ensure_not_submitted(
    state: &AppState,
    exercise_id: i64,
    username: &str,
) -> Result<(), SubmissionError> {
    let caches = state.caches();
    if let Some(result) = caches.results.get(exercise_id, username) {
        if result.completion_date.is_some() {
            return Err(SubmissionError::AlreadySubmitted {
                exercise_id,
                username: username.to_string(),
            });
        }
        return Ok(());
    }
    if caches.participations.contains(exercise_id, username) {
        return Ok(());
    }

    let repos = state.repos();
    let Some(participation) =
        repos.participations.find_by_exercise_and_username(exercise_id, username).await?
    else {
        return Ok(());
    };
    let Some(participation_id) = participation.id else {
        return Ok(());
    };
    if !repos.submissions.exists_by_participation_id(participation_id).await? {
        return Ok(());
    }

    match repos.results.find_latest_for_participant(exercise_id, username).await? {
        Some(result) if result.completion_date.is_some() => {
            caches.results.put(exercise_id, username, result);
            Err(SubmissionError::AlreadySubmitted { exercise_id, username: username.to_string() })
        }
        _ => Ok(()),
    }
}
