//! Working memory (C4): a bounded map of named slots per workflow thread.
//!
//! Grounded in the teacher's `dashmap`-based concurrent state (already a
//! `loom` dependency) and the bounded-channel spirit of its
//! `channels::ephemeral_value`/`channels::named_barrier` modules, here
//! specialized into a per-thread slot map with LRU eviction over a pinned
//! exclusion set (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Mutex;

struct SlotEntry {
    value: Value,
    last_read: u64,
}

struct ThreadSlots {
    entries: HashMap<String, SlotEntry>,
}

/// Bounded per-thread slot store. `capacity` caps the slot *count* per
/// thread; `pinned` names slots that are never evicted (spec §4.4 names
/// `active_case_id` and `intake_state` as the default pinned set).
pub struct WorkingMemory {
    by_thread: DashMap<String, Mutex<ThreadSlots>>,
    capacity: usize,
    pinned: Vec<String>,
    clock: AtomicU64,
}

impl WorkingMemory {
    pub fn new(capacity: usize, pinned: Vec<String>) -> Self {
        Self {
            by_thread: DashMap::new(),
            capacity,
            pinned,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, thread_id: &str, slot: &str) -> Option<Value> {
        let entry = self.by_thread.get(thread_id)?;
        let mut guard = entry.lock().unwrap();
        let read_at = self.tick();
        let value = guard.entries.get(slot).map(|e| e.value.clone());
        if let Some(e) = guard.entries.get_mut(slot) {
            e.last_read = read_at;
        }
        value
    }

    /// Atomic set: evicts the least-recently-read non-pinned slot if the
    /// thread's slot count is at capacity and `slot` is new.
    pub fn set(&self, thread_id: &str, slot: &str, value: Value) {
        let entry = self
            .by_thread
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                Mutex::new(ThreadSlots {
                    entries: HashMap::new(),
                })
            });
        let mut guard = entry.lock().unwrap();
        let now = self.tick();

        if !guard.entries.contains_key(slot) && guard.entries.len() >= self.capacity {
            let victim = guard
                .entries
                .iter()
                .filter(|(name, _)| !self.pinned.iter().any(|p| p == *name))
                .min_by_key(|(_, e)| e.last_read)
                .map(|(name, _)| name.clone());
            if let Some(victim) = victim {
                guard.entries.remove(&victim);
            }
        }

        guard.entries.insert(
            slot.to_string(),
            SlotEntry {
                value,
                last_read: now,
            },
        );
    }

    pub fn snapshot(&self, thread_id: &str) -> HashMap<String, Value> {
        match self.by_thread.get(thread_id) {
            Some(entry) => entry
                .lock()
                .unwrap()
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            None => HashMap::new(),
        }
    }
}
