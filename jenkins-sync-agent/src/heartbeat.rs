use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Anything that can tell when it last heard from the API server.
pub trait HeartbeatSource: Send + Sync {
    fn name(&self) -> &str;
    /// `None` until the first event arrives.
    fn last_event(&self) -> Option<Instant>;
}

#[async_trait]
pub trait Monitored: Send + Sync {
    fn is_running(&self) -> bool;
    fn heartbeat_sources(&self) -> Vec<Arc<dyn HeartbeatSource>>;
    async fn restart(&self);
}

/// Detects watches that silently stopped delivering events. A source that saw
/// nothing for longer than `staleness` on more than `threshold` consecutive
/// ticks restarts the whole manager.
pub struct HeartbeatMonitor {
    period: Duration,
    staleness: Duration,
    threshold: u32,
    misses: HashMap<String, u32>,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration, staleness: Duration, threshold: u32) -> Self {
        Self {
            period,
            staleness,
            threshold,
            misses: HashMap::new(),
        }
    }

    /// Returns `true` when a restart is due, the counters are reset in that case.
    pub fn tick(&mut self, sources: &[Arc<dyn HeartbeatSource>], now: Instant) -> bool {
        let mut restart = false;

        for source in sources {
            let Some(last_event) = source.last_event() else {
                continue;
            };

            let misses = self.misses.entry(source.name().to_owned()).or_insert(0);
            let elapsed = now.saturating_duration_since(last_event);

            if elapsed >= self.staleness {
                *misses += 1;
                debug!(
                    "No {} events for {}s ({} missed checks)",
                    source.name(),
                    elapsed.as_secs(),
                    misses
                );
            } else {
                *misses = 0;
            }

            if *misses > self.threshold {
                warn!(
                    "{} watch looks dead, no events for {}s!",
                    source.name(),
                    elapsed.as_secs()
                );
                restart = true;
            }
        }

        if restart {
            self.misses.clear();
        }

        restart
    }

    pub async fn run(mut self, target: Arc<dyn Monitored>, cancel: CancellationToken) {
        info!(
            "Starting heartbeat monitor (every {}s, {}s staleness window)...",
            self.period.as_secs(),
            self.staleness.as_secs()
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => (),
            }

            if !target.is_running() {
                continue;
            }

            if self.tick(&target.heartbeat_sources(), Instant::now()) {
                warn!("Restarting the controller manager due to stale watches...");
                target.restart().await;
            }
        }

        info!("Heartbeat monitor stopped");
    }
}

#[cfg(test)]
impl HeartbeatMonitor {
    pub fn misses(&self, source: &str) -> u32 {
        self.misses.get(source).copied().unwrap_or(0)
    }
}
