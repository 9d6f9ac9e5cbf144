//! Per-agent keyed concurrent table
//!
//! Every entry sits behind its own mutex so updates to unrelated agents never
//! contend. The map guard is always released before an entry lock is taken, so
//! a caller holding one agent's lock may still look up or create another agent.

use crate::agent::AgentId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Concurrent map of agent id to an exclusively locked value
pub struct AgentTable<T> {
    entries: DashMap<AgentId, Arc<Mutex<T>>>,
}

impl<T> Default for AgentTable<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> AgentTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically fetch the entry for `id`, creating it with `init` if absent.
    /// Returns the entry and whether it was created by this call.
    pub fn get_or_create<F>(&self, id: AgentId, init: F) -> (Arc<Mutex<T>>, bool)
    where
        F: FnOnce() -> T,
    {
        let mut created = false;
        let entry = self.entries.entry(id).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(init()))
        });
        let handle = Arc::clone(entry.value());
        drop(entry);
        (handle, created)
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<Mutex<T>>> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Run `f` with exclusive access to an existing entry
    pub fn with<R, F>(&self, id: AgentId, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let entry = self.get(id)?;
        let mut guard = entry.lock();
        Some(f(&mut guard))
    }

    /// Run `f` with exclusive access, creating the entry first if needed.
    /// `f` receives whether the entry was just created.
    pub fn with_or_create<R, I, F>(&self, id: AgentId, init: I, f: F) -> R
    where
        I: FnOnce() -> T,
        F: FnOnce(&mut T, bool) -> R,
    {
        let (entry, created) = self.get_or_create(id, init);
        let mut guard = entry.lock();
        f(&mut guard, created)
    }

    /// Compare-and-swap style update: apply `f` only when `expected` holds for
    /// the current value. Returns `None` if the agent is absent.
    pub fn update_if<P, F>(&self, id: AgentId, expected: P, f: F) -> Option<bool>
    where
        P: FnOnce(&T) -> bool,
        F: FnOnce(&mut T),
    {
        self.with(id, |value| {
            if expected(value) {
                f(value);
                true
            } else {
                false
            }
        })
    }

    pub fn remove(&self, id: AgentId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Ids currently present, in no particular order
    pub fn ids(&self) -> Vec<AgentId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Handles to every entry; map guards are released before returning
    pub fn entries(&self) -> Vec<(AgentId, Arc<Mutex<T>>)> {
        self.entries
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<T: Clone> AgentTable<T> {
    /// Clone of the value for `id`
    pub fn read(&self, id: AgentId) -> Option<T> {
        self.with(id, |value| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_get_or_create_reports_creation() {
        let table: AgentTable<u32> = AgentTable::new();
        let (_, created) = table.get_or_create(1, || 5);
        assert!(created);
        let (entry, created) = table.get_or_create(1, || 9);
        assert!(!created);
        assert_eq!(*entry.lock(), 5);
    }

    #[test]
    fn test_update_if() {
        let table: AgentTable<u32> = AgentTable::new();
        table.get_or_create(1, || 0);

        assert_eq!(table.update_if(1, |v| *v == 0, |v| *v = 1), Some(true));
        assert_eq!(table.update_if(1, |v| *v == 0, |v| *v = 2), Some(false));
        assert_eq!(table.read(1), Some(1));
        assert_eq!(table.update_if(2, |_| true, |v| *v = 2), None);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let table: Arc<AgentTable<u64>> = Arc::new(AgentTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        table.with_or_create(i % 4, || 0, |v, _| *v += 1);
                        table.with_or_create(100 + t, || 0, |v, _| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let shared: u64 = (0..4).filter_map(|id| table.read(id)).sum();
        assert_eq!(shared, 8 * 1000);
        for t in 0..8 {
            assert_eq!(table.read(100 + t), Some(1000));
        }
    }

    #[test]
    fn test_remove_and_clear() {
        let table: AgentTable<&str> = AgentTable::new();
        table.get_or_create(1, || "a");
        table.get_or_create(2, || "b");
        assert!(table.remove(1));
        assert!(!table.remove(1));
        assert_eq!(table.ids(), vec![2]);
        table.clear();
        assert!(table.is_empty());
    }
}
