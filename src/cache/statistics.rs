use dashmap::DashMap;

use crate::models::ScoredSubmission;
use crate::services::statistics::LiveStatistics;

/// How far an exercise's statistics have drifted from the persisted results.
/// `Edited` outranks `NewResults`: an edited exercise always needs a full
/// rebuild, whatever else happened since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Staleness {
    NewResults,
    Edited,
}

#[derive(Debug, Default)]
pub(crate) struct DirtySet {
    exercises: DashMap<i64, Staleness>,
}

impl DirtySet {
    pub(crate) fn mark(&self, exercise_id: i64, staleness: Staleness) {
        self.exercises
            .entry(exercise_id)
            .and_modify(|current| *current = (*current).max(staleness))
            .or_insert(staleness);
    }

    pub(crate) fn take(&self, exercise_id: i64) -> Option<Staleness> {
        self.exercises.remove(&exercise_id).map(|(_, staleness)| staleness)
    }

    pub(crate) fn contains(&self, exercise_id: i64) -> bool {
        self.exercises.contains_key(&exercise_id)
    }

    pub(crate) fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.exercises.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn clear(&self) {
        self.exercises.clear();
    }
}

/// Results persisted since the last statistics tick, waiting to be folded
/// into the running counters.
#[derive(Debug, Default)]
pub(crate) struct StatisticsBacklog {
    pending: DashMap<i64, Vec<ScoredSubmission>>,
}

impl StatisticsBacklog {
    pub(crate) fn push(&self, exercise_id: i64, scored: ScoredSubmission) {
        self.pending.entry(exercise_id).or_default().push(scored);
    }

    pub(crate) fn take(&self, exercise_id: i64) -> Vec<ScoredSubmission> {
        self.pending.remove(&exercise_id).map(|(_, results)| results).unwrap_or_default()
    }

    pub(crate) fn is_empty_for(&self, exercise_id: i64) -> bool {
        self.pending.get(&exercise_id).map_or(true, |results| results.is_empty())
    }

    pub(crate) fn clear(&self) {
        self.pending.clear();
    }
}

#[derive(Debug, Default)]
pub(crate) struct LiveStatisticsCache {
    statistics: DashMap<i64, LiveStatistics>,
}

impl LiveStatisticsCache {
    pub(crate) fn get(&self, exercise_id: i64) -> Option<LiveStatistics> {
        self.statistics.get(&exercise_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn put(&self, exercise_id: i64, statistics: LiveStatistics) {
        self.statistics.insert(exercise_id, statistics);
    }

    pub(crate) fn remove(&self, exercise_id: i64) {
        self.statistics.remove(&exercise_id);
    }

    pub(crate) fn clear(&self) {
        self.statistics.clear();
    }
}
