//! Interval poll loop.
//!
//! Background task that runs one poll cycle per tick until a shutdown
//! signal arrives. Repeated fetch failures are logged a few times and then
//! suppressed until the source recovers, so a long outage does not flood
//! the log.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::poller::Poller;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Consecutive failures logged at full volume before suppression kicks in.
const MAX_LOGGED_FAILURES: u32 = 3;

/// Poll loop settings decoded from the `poll` config section.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// Build a `PollConfig` from the loaded JSON configuration.
pub fn build_poll_config(cfg: &Value) -> PollConfig {
    let poll = cfg.get("poll").and_then(|v| v.as_object());

    let enabled = poll
        .and_then(|p| p.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let interval_secs = poll
        .and_then(|p| p.get("intervalSecs"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    PollConfig {
        enabled,
        interval_secs,
    }
}

/// Run the poll loop until shutdown is signalled.
pub async fn poll_loop(
    poller: Arc<Poller>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if *shutdown.borrow() {
            break;
        }

        match poller.run_cycle().await {
            Ok(_) => {
                if consecutive_failures > MAX_LOGGED_FAILURES {
                    info!(
                        target: "poller",
                        failures = consecutive_failures,
                        "update source recovered"
                    );
                }
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= MAX_LOGGED_FAILURES {
                    warn!(target: "poller", error = %e, "poll cycle failed");
                } else if consecutive_failures == MAX_LOGGED_FAILURES + 1 {
                    warn!(
                        target: "poller",
                        error = %e,
                        "poll cycle still failing, suppressing further reports"
                    );
                }
            }
        }
    }

    info!(target: "poller", "poll loop stopped");
}
