use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleState {
    #[default]
    NotScheduled,
    Scheduled,
    Running,
    Stopped,
}

impl ScheduleState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::NotScheduled => "not_scheduled",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    /// States in which the exercise definition is held in memory.
    pub(crate) fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScheduleTable {
    states: DashMap<i64, ScheduleState>,
}

impl ScheduleTable {
    pub(crate) fn state(&self, exercise_id: i64) -> ScheduleState {
        self.states.get(&exercise_id).map(|entry| *entry.value()).unwrap_or_default()
    }

    pub(crate) fn set(&self, exercise_id: i64, state: ScheduleState) {
        self.states.insert(exercise_id, state);
    }

    /// Moves `exercise_id` from `from` to `to`; returns `false` when the
    /// exercise was in another state.
    pub(crate) fn transition(
        &self,
        exercise_id: i64,
        from: ScheduleState,
        to: ScheduleState,
    ) -> bool {
        let mut entry = self.states.entry(exercise_id).or_default();
        if *entry != from {
            return false;
        }
        *entry = to;
        true
    }

    pub(crate) fn remove(&self, exercise_id: i64) -> Option<ScheduleState> {
        self.states.remove(&exercise_id).map(|(_, state)| state)
    }

    pub(crate) fn active(&self) -> Vec<(i64, ScheduleState)> {
        let mut active: Vec<(i64, ScheduleState)> = self
            .states
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        active.sort_unstable_by_key(|(id, _)| *id);
        active
    }

    pub(crate) fn clear(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_requires_expected_state() {
        let table = ScheduleTable::default();
        assert_eq!(table.state(4), ScheduleState::NotScheduled);

        assert!(table.transition(4, ScheduleState::NotScheduled, ScheduleState::Scheduled));
        assert!(!table.transition(4, ScheduleState::NotScheduled, ScheduleState::Running));
        assert!(table.transition(4, ScheduleState::Scheduled, ScheduleState::Running));
        assert_eq!(table.active(), vec![(4, ScheduleState::Running)]);

        table.set(4, ScheduleState::Stopped);
        assert!(table.active().is_empty());
    }
}
