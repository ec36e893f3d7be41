//! Periodic housekeeping: pings every live notification channel so dead
//! sockets surface early, and drops expired session ciphers.

use crate::state::ServerState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub struct PulseManager {
    state: Arc<ServerState>,
    interval: Duration,
    pulses: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

impl PulseManager {
    pub fn new(state: Arc<ServerState>, interval: Duration) -> Self {
        Self {
            state,
            interval,
            pulses: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// One round: ping the channels, purge the cipher cache.
    pub fn pulse(&self) -> PulseResult {
        let result = PulseResult {
            pings_sent: self.state.notifications().pulse(),
            ciphers_purged: self.state.ciphers().purge_expired(),
        };
        self.pulses.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Runs the pulse loop (call from a background task).
    pub async fn run(&self) {
        tracing::info!("Pulse started (interval={:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let result = self.pulse();
            if result.pings_sent > 0 || result.ciphers_purged > 0 {
                tracing::debug!(
                    "Pulse: {} pings sent, {} expired sessions dropped",
                    result.pings_sent,
                    result.ciphers_purged
                );
            }
        }

        tracing::info!("Pulse stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Number of completed rounds.
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PulseResult {
    pub pings_sent: usize,
    pub ciphers_purged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::DefaultApplication;
    use crate::config::Config;
    use tempfile::TempDir;

    fn state(home: &TempDir) -> Arc<ServerState> {
        let mut config = Config::default();
        config.storage.home_dir = home.path().to_path_buf();
        Arc::new(ServerState::open(config, Arc::new(DefaultApplication::new())).unwrap())
    }

    #[tokio::test]
    async fn test_loop_pulses_until_shutdown() {
        let home = TempDir::new().unwrap();
        let manager = Arc::new(PulseManager::new(state(&home), Duration::from_millis(20)));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run().await })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(manager.pulses() >= 1);
    }

    #[test]
    fn test_pulse_without_channels() {
        let home = TempDir::new().unwrap();
        let manager = PulseManager::new(state(&home), Duration::from_secs(30));
        assert_eq!(manager.pulse(), PulseResult::default());
        assert_eq!(manager.pulses(), 1);
    }
}
