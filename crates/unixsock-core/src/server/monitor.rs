//! Socket file health monitor
//!
//! Cleanup scripts and tmp reapers sometimes delete socket files out from
//! under a running server. The listener keeps working but nobody can reach
//! it, so the monitor polls for the file and binds a replacement listener
//! when it disappears. Polling keeps this portable; recovery takes at most
//! one poll interval.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::listener;
use crate::Result;

pub(crate) struct PathMonitor {
    path: PathBuf,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    rebound: mpsc::Sender<UnixListener>,
}

impl PathMonitor {
    pub fn new(
        path: PathBuf,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
        rebound: mpsc::Sender<UnixListener>,
    ) -> Self {
        Self {
            path,
            interval,
            shutdown,
            rebound,
        }
    }

    /// Watch the socket file until shutdown; an error here ends the server
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first tick (fires immediately)
        ticker.tick().await;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    if tokio::fs::metadata(&self.path).await.is_ok() {
                        continue;
                    }
                    if !self.rebind().await? {
                        break;
                    }
                }
            }
        }

        info!("Socket monitor stopped");
        Ok(())
    }

    /// Returns false when the server is shutting down and the monitor should stop
    async fn rebind(&self) -> Result<bool> {
        warn!("Socket file {} disappeared, rebinding", self.path.display());
        let listener = listener::bind(&self.path)?;

        // Close may have removed the path while we were binding
        if *self.shutdown.borrow() {
            drop(listener);
            let _ = std::fs::remove_file(&self.path);
            return Ok(false);
        }

        if self.rebound.send(listener).await.is_err() {
            debug!("Accept loop is gone, dropping rebound listener");
            return Ok(false);
        }

        info!("Rebound listener at {}", self.path.display());
        Ok(true)
    }
}
