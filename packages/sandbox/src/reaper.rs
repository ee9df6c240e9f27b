// ABOUTME: Periodic task that deletes sandboxes past their expires_at
// ABOUTME: Snapshots expired ids under the read lock, deletes outside it

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::provider::DockerProvider;

pub const REAP_PERIOD: Duration = Duration::from_secs(30);

/// Upper bound on each individual delete; one slow removal must not stall
/// the whole sweep.
const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the background expiry sweeper.
pub struct Reaper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Start the sweep loop. The first sweep happens one full period after
    /// startup.
    pub fn spawn(provider: Arc<DockerProvider>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            info!("reaper started (period {:?})", period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => reap_expired(&provider).await,
                    _ = &mut shutdown_rx => {
                        info!("reaper stopped");
                        return;
                    }
                }
            }
        });
        Self { shutdown, task }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

async fn reap_expired(provider: &DockerProvider) {
    let expired = provider.expired_ids(Utc::now()).await;
    for id in expired {
        match tokio::time::timeout(DELETE_TIMEOUT, provider.delete_sandbox(&id)).await {
            Ok(Ok(())) => info!("reaped expired sandbox {}", id),
            // the user raced us and deleted it first
            Ok(Err(SandboxError::NotFound(_))) => debug!("sandbox {} vanished before reap", id),
            Ok(Err(e)) => warn!("failed to reap sandbox {}: {}", id, e),
            Err(_) => warn!("timed out reaping sandbox {}", id),
        }
    }
}
