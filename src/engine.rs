//! Entry point for the layers above: submission ingest, live participation
//! lookups, statistics and the scheduler switch.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::{ScheduleState, Staleness};
use crate::core::config::Settings;
use crate::core::state::AppState;
use crate::core::time::now_utc;
use crate::models::{
    Participation, QuizExercise, QuizStatistics, QuizSubmission, ValidationError,
};
use crate::repositories::{Repositories, RepositoryError};
use crate::services::statistics::StatisticsError;
use crate::services::submission_ingest::{self, SubmissionError};
use crate::tasks::quiz;
use crate::tasks::scheduler::SchedulerHandle;

#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error("exercise {0} does not exist")]
    NotFound(i64),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct QuizEngine {
    state: AppState,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl QuizEngine {
    pub fn new(settings: Settings, repositories: Repositories) -> Self {
        Self { state: AppState::new(settings, repositories), scheduler: Mutex::new(None) }
    }

    /// Saves (`is_final == false`) or submits a user's answers. The returned
    /// submission is what the cache now holds; it reaches storage on the next
    /// fast tick.
    pub async fn submit(
        &self,
        exercise_id: i64,
        submission: QuizSubmission,
        username: &str,
        is_final: bool,
    ) -> Result<QuizSubmission, SubmissionError> {
        let now = now_utc();
        submission_ingest::submit(&self.state, exercise_id, submission, username, is_final, now)
            .await
    }

    /// The user's participation as the live caches see it. Before the first
    /// persist this is an unsaved participation carrying the cached submission.
    pub fn get_live_participation(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Option<Participation> {
        let caches = self.state.caches();
        if let Some(participation) = caches.participations.get(exercise_id, username) {
            return Some(participation);
        }
        let submission = caches.submissions.get(exercise_id, username)?;
        let mut participation = Participation::new(exercise_id, username);
        participation.submission = Some(submission);
        Some(participation)
    }

    /// Starts the scheduler loops with `tick` as the fast cadence. Does
    /// nothing when they already run.
    pub async fn start_schedule(&self, tick: Duration) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            tracing::debug!("Quiz scheduler already running");
            return;
        }
        *scheduler = Some(SchedulerHandle::start(self.state.clone(), tick));
    }

    /// Starts the scheduler with the configured fast cadence.
    pub async fn start_default_schedule(&self) {
        let tick = self.state.settings().engine().fast_tick();
        self.start_schedule(tick).await;
    }

    pub async fn stop_schedule(&self) {
        let handle = self.scheduler.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_schedule_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Forgets every cached exercise, submission, result and counter. Queued
    /// writes are dropped with them.
    pub fn clear_all_cached_data(&self) {
        self.state.caches().clear();
        tracing::info!("Cleared all live quiz caches");
    }

    /// Rebuilds the statistics of one exercise from storage right away and
    /// stores them.
    pub async fn force_recalculate_statistics(
        &self,
        exercise_id: i64,
    ) -> Result<QuizStatistics, StatisticsError> {
        let exercise = self.load_exercise(exercise_id).await.map_err(|err| match err {
            ExerciseError::Repository(err) => StatisticsError::Repository(err),
            ExerciseError::Invalid(err) => StatisticsError::InvalidExercise(err),
            ExerciseError::NotFound(_) => StatisticsError::NotFound(exercise_id),
        })?;
        Ok(quiz::recalculate(&self.state, &exercise).await?)
    }

    /// Live counters when the exercise is running, the last stored snapshot
    /// otherwise.
    pub async fn statistics(
        &self,
        exercise_id: i64,
    ) -> Result<Option<QuizStatistics>, StatisticsError> {
        if let Some(live) = self.state.caches().statistics.get(exercise_id) {
            return Ok(Some(self.state.statistics().snapshot(&live)));
        }
        Ok(self.state.repos().statistics.find_by_exercise(exercise_id).await?)
    }

    /// Stores an edited exercise. A live exercise has its cached definition
    /// replaced. Stored results are re-scored and statistics rebuilt on the
    /// next slow tick or forced recalculation, whether or not the quiz still
    /// runs.
    pub async fn update_exercise(
        &self,
        exercise: QuizExercise,
    ) -> Result<QuizExercise, ExerciseError> {
        exercise.validate()?;
        let saved = self.state.repos().exercises.save(&exercise).await?;

        let caches = self.state.caches();
        let live = caches.schedules.state(saved.id).is_active();
        if live {
            caches.exercises.update(saved.clone());
        }
        caches.dirty.mark(saved.id, Staleness::Edited);
        tracing::info!(exercise_id = saved.id, live, "Quiz edited; results will be re-evaluated");
        Ok(saved)
    }

    /// Puts a stored exercise on the schedule now instead of waiting for the
    /// lifecycle tick to find it.
    pub async fn schedule_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<ScheduleState, ExerciseError> {
        let exercise = self
            .state
            .repos()
            .exercises
            .find_by_id(exercise_id)
            .await?
            .ok_or(ExerciseError::NotFound(exercise_id))?;
        exercise.validate()?;
        Ok(quiz::schedule(&self.state, exercise, now_utc()))
    }

    pub fn cancel_schedule(&self, exercise_id: i64) {
        quiz::cancel(&self.state, exercise_id);
        tracing::info!(exercise_id, "Quiz schedule cancelled");
    }

    pub fn schedule_state(&self, exercise_id: i64) -> ScheduleState {
        self.state.caches().schedules.state(exercise_id)
    }

    /// Drops one user's cached submission and participation. Writes already
    /// queued for storage still complete.
    pub fn discard_live_submission(&self, exercise_id: i64, username: &str) -> bool {
        let caches = self.state.caches();
        let removed = caches.submissions.remove(exercise_id, username).is_some();
        caches.participations.remove(exercise_id, username);
        removed
    }

    /// Runs one fast tick now. Used at shutdown so submitted answers are not
    /// left in memory.
    pub async fn flush(&self) -> anyhow::Result<()> {
        quiz::persist_submissions(&self.state, now_utc()).await
    }

    async fn load_exercise(&self, exercise_id: i64) -> Result<Arc<QuizExercise>, ExerciseError> {
        submission_ingest::load_exercise(&self.state, exercise_id).await.map_err(|err| match err {
            SubmissionError::Repository(err) => ExerciseError::Repository(err),
            SubmissionError::InvalidExercise(err) => ExerciseError::Invalid(err),
            _ => ExerciseError::NotFound(exercise_id),
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}
