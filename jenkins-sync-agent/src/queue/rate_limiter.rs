use std::{collections::HashMap, sync::Mutex, time::Duration};

use jenkins_sync_core::resources::key::ResourceKey;

/// `base * 2^failures`, capped at `cap`.
pub fn backoff_delay(base: Duration, cap: Duration, failures: u32) -> Duration {
    2u32.checked_pow(failures)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Per-key exponential backoff, the failure count grows with every `when` call
/// until the key is forgotten.
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn when(&self, key: &ResourceKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = backoff_delay(self.base, self.cap, *count);
        *count = count.saturating_add(1);

        delay
    }

    pub fn forget(&self, key: &ResourceKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
