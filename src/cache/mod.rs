//! In-memory state of the live quizzes.
//!
//! Everything here lives only as long as the process. The durable truth is in
//! the repositories; these maps buffer writes between scheduler ticks.

mod schedule;
mod statistics;
mod user_cache;

use std::sync::Arc;

use dashmap::DashMap;
use time::{Duration, OffsetDateTime};

use crate::db::types::SubmissionType;
use crate::models::{Participation, QuizExercise, QuizResult, QuizSubmission};

pub use schedule::ScheduleState;
pub(crate) use schedule::ScheduleTable;
pub(crate) use statistics::{DirtySet, LiveStatisticsCache, Staleness, StatisticsBacklog};
pub(crate) use user_cache::UserCache;

/// Live exercise definitions. Replaced as a whole so readers never observe a
/// half-edited exercise.
#[derive(Debug, Default)]
pub(crate) struct ExerciseCache {
    exercises: DashMap<i64, Arc<QuizExercise>>,
}

impl ExerciseCache {
    pub(crate) fn get(&self, exercise_id: i64) -> Option<Arc<QuizExercise>> {
        self.exercises.get(&exercise_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn update(&self, exercise: QuizExercise) -> Arc<QuizExercise> {
        let exercise = Arc::new(exercise);
        self.exercises.insert(exercise.id, exercise.clone());
        exercise
    }

    pub(crate) fn remove(&self, exercise_id: i64) -> Option<Arc<QuizExercise>> {
        self.exercises.remove(&exercise_id).map(|(_, exercise)| exercise)
    }

    pub(crate) fn len(&self) -> usize {
        self.exercises.len()
    }

    pub(crate) fn clear(&self) {
        self.exercises.clear();
    }
}

/// A submission that left the submission cache and is on its way to storage.
/// Stays queued until every row is written; `participation` remembers a row
/// already created by an earlier attempt.
#[derive(Debug, Clone)]
pub(crate) struct PendingPersist {
    pub(crate) submission: QuizSubmission,
    pub(crate) participation: Option<Participation>,
    pub(crate) attempts: u32,
}

impl PendingPersist {
    pub(crate) fn new(submission: QuizSubmission) -> Self {
        Self { submission, participation: None, attempts: 0 }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LiveCaches {
    pub(crate) exercises: ExerciseCache,
    pub(crate) submissions: UserCache<QuizSubmission>,
    pub(crate) participations: UserCache<Participation>,
    pub(crate) results: UserCache<QuizResult>,
    pub(crate) pending: UserCache<PendingPersist>,
    pub(crate) dirty: DirtySet,
    pub(crate) backlog: StatisticsBacklog,
    pub(crate) statistics: LiveStatisticsCache,
    pub(crate) schedules: ScheduleTable,
}

impl LiveCaches {
    /// Moves every submission of `exercise` that is final, or whose owner's
    /// deadline (plus `grace`) has passed, into the persist queue. Open
    /// submissions past the deadline are closed as timeouts. A user with an
    /// earlier submission still queued keeps the newer one cached until the
    /// queue is clear.
    pub(crate) fn claim_for_persist(
        &self,
        exercise: &QuizExercise,
        now: OffsetDateTime,
        grace: Duration,
    ) -> usize {
        self.submissions.take_where(
            exercise.id,
            |username, submission| {
                (submission.submitted || exercise.is_expired_for(username, now, grace))
                    && !self.pending.contains(exercise.id, username)
            },
            |username, submission| self.enqueue(exercise.id, username, submission, now),
        )
    }

    /// Puts one submission into the persist queue, closing it as a timeout
    /// when it was still open.
    pub(crate) fn enqueue(
        &self,
        exercise_id: i64,
        username: &str,
        mut submission: QuizSubmission,
        now: OffsetDateTime,
    ) {
        if !submission.submitted {
            submission.force_timeout(now);
        } else if submission.submission_type.is_none() {
            submission.submission_type = Some(SubmissionType::Manual);
        }
        self.pending.put(exercise_id, username, PendingPersist::new(submission));
    }

    /// True once nothing for the exercise waits to be persisted or counted.
    pub(crate) fn is_drained(&self, exercise_id: i64) -> bool {
        self.submissions.count_for_exercise(exercise_id) == 0
            && self.pending.count_for_exercise(exercise_id) == 0
            && !self.dirty.contains(exercise_id)
            && self.backlog.is_empty_for(exercise_id)
    }

    /// Drops everything held for one exercise, including its definition.
    pub(crate) fn evict_exercise(&self, exercise_id: i64) {
        self.exercises.remove(exercise_id);
        self.submissions.remove_all_for_exercise(exercise_id);
        self.participations.remove_all_for_exercise(exercise_id);
        self.results.remove_all_for_exercise(exercise_id);
        self.pending.remove_all_for_exercise(exercise_id);
        self.dirty.take(exercise_id);
        self.backlog.take(exercise_id);
        self.statistics.remove(exercise_id);
    }

    pub(crate) fn clear(&self) {
        self.exercises.clear();
        self.submissions.clear();
        self.participations.clear();
        self.results.clear();
        self.pending.clear();
        self.dirty.clear();
        self.backlog.clear();
        self.statistics.clear();
        self.schedules.clear();
    }
}
