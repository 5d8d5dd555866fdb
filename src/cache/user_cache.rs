use std::collections::BTreeSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CacheKey {
    pub(crate) exercise_id: i64,
    pub(crate) username: String,
}

impl CacheKey {
    pub(crate) fn new(exercise_id: i64, username: &str) -> Self {
        Self { exercise_id, username: username.to_string() }
    }
}

/// Concurrent map keyed by (exercise, username).
///
/// Each key is written by its owner's requests and drained by the scheduler,
/// so per-key atomicity of the shard lock is all the coordination needed.
#[derive(Debug)]
pub(crate) struct UserCache<T> {
    entries: DashMap<CacheKey, T>,
}

impl<T> Default for UserCache<T> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<T: Clone> UserCache<T> {
    pub(crate) fn put(&self, exercise_id: i64, username: &str, value: T) -> Option<T> {
        self.entries.insert(CacheKey::new(exercise_id, username), value)
    }

    pub(crate) fn get(&self, exercise_id: i64, username: &str) -> Option<T> {
        self.entries.get(&CacheKey::new(exercise_id, username)).map(|entry| entry.value().clone())
    }

    pub(crate) fn contains(&self, exercise_id: i64, username: &str) -> bool {
        self.entries.contains_key(&CacheKey::new(exercise_id, username))
    }

    pub(crate) fn remove(&self, exercise_id: i64, username: &str) -> Option<T> {
        self.entries.remove(&CacheKey::new(exercise_id, username)).map(|(_, value)| value)
    }

    pub(crate) fn remove_all_for_exercise(&self, exercise_id: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.exercise_id != exercise_id);
        before.saturating_sub(self.entries.len())
    }

    /// Snapshot of the entries of one exercise, ordered by username.
    pub(crate) fn all_for_exercise(&self, exercise_id: i64) -> Vec<(String, T)> {
        let mut entries: Vec<(String, T)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().exercise_id == exercise_id)
            .map(|entry| (entry.key().username.clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }

    pub(crate) fn count_for_exercise(&self, exercise_id: i64) -> usize {
        self.entries.iter().filter(|entry| entry.key().exercise_id == exercise_id).count()
    }

    pub(crate) fn exercise_ids(&self) -> BTreeSet<i64> {
        self.entries.iter().map(|entry| entry.key().exercise_id).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    /// Inserts `value` unless `guard` rejects the current entry. The check and
    /// the write happen under the same shard lock.
    pub(crate) fn put_guarded<E>(
        &self,
        exercise_id: i64,
        username: &str,
        value: T,
        guard: impl FnOnce(Option<&T>) -> Result<(), E>,
    ) -> Result<(), E> {
        match self.entries.entry(CacheKey::new(exercise_id, username)) {
            Entry::Occupied(mut occupied) => {
                guard(Some(occupied.get()))?;
                occupied.insert(value);
            }
            Entry::Vacant(vacant) => {
                guard(None)?;
                vacant.insert(value);
            }
        }
        Ok(())
    }

    /// Updates the entry in place or inserts the value produced by `create`.
    pub(crate) fn upsert(
        &self,
        exercise_id: i64,
        username: &str,
        create: impl FnOnce() -> T,
        update: impl FnOnce(&mut T),
    ) {
        self.entries
            .entry(CacheKey::new(exercise_id, username))
            .and_modify(update)
            .or_insert_with(create);
    }

    /// Removes every entry of the exercise accepted by `select`, handing each
    /// removed value to `on_take` while its key is still locked, so nothing
    /// can be written to that key between the removal and the hand-off.
    pub(crate) fn take_where(
        &self,
        exercise_id: i64,
        mut select: impl FnMut(&str, &T) -> bool,
        mut on_take: impl FnMut(&str, T),
    ) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().exercise_id == exercise_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut taken = 0;
        for key in keys {
            if let Entry::Occupied(occupied) = self.entries.entry(key) {
                if !select(&occupied.key().username, occupied.get()) {
                    continue;
                }
                let (key, value) = occupied.remove_entry();
                on_take(&key.username, value);
                taken += 1;
            }
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_previous_value() {
        let cache = UserCache::default();
        cache.put(1, "alice", "draft");
        cache.put(1, "alice", "final");
        assert_eq!(cache.get(1, "alice"), Some("final"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bulk_eviction_only_touches_one_exercise() {
        let cache = UserCache::default();
        cache.put(1, "alice", 1);
        cache.put(1, "bob", 2);
        cache.put(2, "alice", 3);

        assert_eq!(cache.remove_all_for_exercise(1), 2);
        assert_eq!(cache.all_for_exercise(2), vec![("alice".to_string(), 3)]);
        assert_eq!(cache.exercise_ids(), BTreeSet::from([2]));
    }

    #[test]
    fn guarded_put_rejects_without_writing() {
        let cache = UserCache::default();
        cache.put(1, "alice", 10);

        let result = cache.put_guarded(1, "alice", 20, |current| match current {
            Some(value) if *value >= 10 => Err("locked"),
            _ => Ok(()),
        });
        assert_eq!(result, Err("locked"));
        assert_eq!(cache.get(1, "alice"), Some(10));

        assert_eq!(cache.put_guarded(1, "bob", 5, |_| Ok::<_, ()>(())), Ok(()));
        assert_eq!(cache.get(1, "bob"), Some(5));
    }

    #[test]
    fn take_where_moves_only_selected_entries() {
        let cache = UserCache::default();
        cache.put(1, "alice", 1);
        cache.put(1, "bob", 2);
        cache.put(2, "carol", 4);

        let mut taken = Vec::new();
        let count = cache.take_where(1, |_, value| value % 2 == 0, |user, value| {
            taken.push((user.to_string(), value))
        });

        assert_eq!(count, 1);
        assert_eq!(taken, vec![("bob".to_string(), 2)]);
        assert_eq!(cache.get(1, "alice"), Some(1));
        assert_eq!(cache.get(2, "carol"), Some(4));
    }

    #[test]
    fn upsert_updates_in_place() {
        let cache = UserCache::default();
        cache.upsert(1, "alice", || vec![1], |values| values.push(2));
        cache.upsert(1, "alice", || vec![9], |values| values.push(3));
        assert_eq!(cache.get(1, "alice"), Some(vec![1, 3]));
    }

    #[test]
    fn concurrent_writers_on_distinct_keys_do_not_lose_entries() {
        let cache = std::sync::Arc::new(UserCache::default());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for round in 0..100 {
                        cache.put(1, &format!("user-{worker}"), round);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        assert_eq!(cache.count_for_exercise(1), 8);
        assert!(cache.all_for_exercise(1).iter().all(|(_, value)| *value == 99));
    }
}
