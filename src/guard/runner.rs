use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info};

use crate::guard::timer::SessionGuard;

/// Drives a guard's periodic tick on the tokio runtime.
///
/// At most one interval loop runs per runner: a re-entrant `start()` bails
/// instead of stacking a second ticker, so re-renders or navigations in the
/// hosting view cannot leak intervals.
pub struct GuardRunner {
    guard: Arc<Mutex<SessionGuard>>,
    running: Arc<Mutex<bool>>,
    tick_interval: Duration,
}

impl GuardRunner {
    pub fn new(guard: SessionGuard, tick_interval: Duration) -> Self {
        Self {
            guard: Arc::new(Mutex::new(guard)),
            running: Arc::new(Mutex::new(false)),
            tick_interval,
        }
    }

    /// Shared handle to the underlying guard.
    pub fn guard(&self) -> Arc<Mutex<SessionGuard>> {
        self.guard.clone()
    }

    /// Spawn the tick loop. Errors if it is already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if *running {
            anyhow::bail!("tick loop is already running for this session");
        }
        *running = true;
        drop(running);

        let guard = self.guard.clone();
        let running = self.running.clone();
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(period);

            loop {
                interval.tick().await;

                if !*running.lock().await {
                    debug!("tick loop stopped");
                    break;
                }

                let mut guard = guard.lock().await;
                match guard.tick() {
                    Ok(0) => {
                        info!(
                            session_key = guard.session_key(),
                            "countdown reached zero; stopping tick loop"
                        );
                        *running.lock().await = false;
                        break;
                    }
                    Ok(remaining) => {
                        debug!(session_key = guard.session_key(), remaining, "tick");
                    }
                    Err(e) => {
                        error!("tick failed: {e:#}");
                        *running.lock().await = false;
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Flag the loop to stop at its next tick.
    pub async fn stop(&self) {
        *self.running.lock().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Stop ticking and drop the guard's in-memory state. Persisted state
    /// stays until `complete()`.
    pub async fn dispose(&self) {
        self.stop().await;
        self.guard.lock().await.dispose();
    }
}
