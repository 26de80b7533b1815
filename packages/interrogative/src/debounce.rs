//! Trailing-edge debouncing keyed by resource.
//!
//! Each key has at most one pending timer. Re-arming a key cancels the
//! previous timer, so only the last arm within the window fires. Fires carry
//! a generation number; the owner confirms it with [`Debouncer::fire`] before
//! acting, which rejects a fire that raced with a re-arm or a cancel.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

struct Pending {
    generation: u64,
    cancel: CancellationToken,
}

pub struct Debouncer<K> {
    delay: Duration,
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_generation: 0,
            pending: HashMap::new(),
        }
    }

    /// (Re)start the timer for `key`. `on_fire` runs once the delay elapses
    /// without another arm or cancel for the same key.
    pub fn arm<F>(&mut self, key: K, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel(&key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire(generation),
            }
        });

        self.pending.insert(key, Pending { generation, cancel });
        generation
    }

    /// Confirm a fire. Returns true (and clears the key) only if `generation`
    /// is still the pending one.
    pub fn fire(&mut self, key: &K, generation: u64) -> bool {
        match self.pending.get(key) {
            Some(p) if p.generation == generation => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(p) => {
                p.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, p) in self.pending.drain() {
            p.cancel.cancel();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for p in self.pending.values() {
            p.cancel.cancel();
        }
    }
}
