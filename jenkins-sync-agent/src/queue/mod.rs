use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use jenkins_sync_core::resources::key::ResourceKey;
use log::debug;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use self::rate_limiter::ExponentialBackoff;

pub mod rate_limiter;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ResourceKey>,
    /// keys waiting to be processed, queued or not
    dirty: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    shutting_down: bool,
}

/// Deduplicating work queue. A key is handed to at most one worker at a time,
/// additions made while it's being processed are coalesced into a single
/// re-delivery after `done`.
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialBackoff,
    delayed: CancellationToken,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, limiter: ExponentialBackoff) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter,
            delayed: CancellationToken::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: ResourceKey) {
        let mut state = self.lock();

        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }

        state.queue.push_back(key);
        drop(state);

        self.notify.notify_one();
    }

    /// Waits for the next key, `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.notify.notified();

            {
                let mut state = self.lock();

                if state.shutting_down {
                    return None;
                }

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());

                    return Some(key);
                }
            }

            notified.await;
        }
    }

    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.lock();
        state.processing.remove(key);

        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);

            self.notify.notify_one();
        }
    }

    pub fn add_after(self: &Arc<Self>, key: ResourceKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }

        if delay.is_zero() {
            return self.add(key);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.delayed.cancelled() => (),
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    pub fn add_rate_limited(self: &Arc<Self>, key: ResourceKey) {
        let delay = self.limiter.when(&key);

        self.add_after(key, delay);
    }

    pub fn forget(&self, key: &ResourceKey) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Drops pending delayed additions and wakes every waiting `get`.
    pub fn shutdown(&self) {
        debug!("Shutting down {} queue...", self.name);

        self.lock().shutting_down = true;
        self.delayed.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

#[cfg(test)]
impl WorkQueue {
    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
