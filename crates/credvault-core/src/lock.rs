//! Per-credential-name mutual exclusion.
//!
//! Mutations of one credential are serialized while unrelated credentials
//! proceed concurrently. Names are compared case-insensitively. Multi-name
//! acquisition locks in sorted order so two overlapping bulk operations
//! cannot deadlock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of credential name to async mutex. Idle entries are pruned lazily.
#[derive(Debug, Default)]
pub struct KeyedLock {
    slots: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

/// Holds one or more name locks until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    /// Lower-cased names held by this guard, sorted.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `name` is covered by this guard.
    #[must_use]
    pub fn covers(&self, name: &str) -> bool {
        self.names.binary_search(&name.to_lowercase()).is_ok()
    }
}

impl KeyedLock {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single credential name.
    pub async fn lock(&self, name: &str) -> KeyGuard {
        self.lock_many([name]).await
    }

    /// Lock every name in `names`. Duplicates (ignoring case) are locked once.
    pub async fn lock_many<I, S>(&self, names: I) -> KeyGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut slots = self.slots.lock().await;
            slots.retain(|_, slot| slot.strong_count() > 0);
            names
                .iter()
                .map(|name| {
                    if let Some(existing) = slots.get(name).and_then(Weak::upgrade) {
                        return existing;
                    }
                    let fresh = Arc::new(Mutex::new(()));
                    slots.insert(name.clone(), Arc::downgrade(&fresh));
                    fresh
                })
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        KeyGuard {
            names: names.into_iter().collect(),
            _guards: guards,
        }
    }

    /// Number of names currently tracked (held or awaiting pruning).
    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}
