//! Background removal of expired sessions.
//!
//! A sweep finds every record whose embedded cookie expiration is before the
//! sweep instant, removes each one by sid, then asks the backend to compact.
//! Individual failures are logged and skipped; a failed scan abandons the
//! tick and the next tick retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keepsake_core::record::{self, SID_FIELD};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::docstore::{DocumentStore, RemoveOptions};
use crate::error::Result;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired records found by the scan.
    pub matched: usize,
    /// Records actually removed.
    pub removed: usize,
    /// Records that could not be removed.
    pub failed: usize,
    /// Whether the follow-up compaction succeeded.
    pub compacted: bool,
}

/// Run one sweep against `store`, treating `now` as the current instant.
///
/// Only a failed scan is returned as an error.
pub async fn sweep_expired<D>(store: &D, now: DateTime<Utc>) -> Result<SweepReport>
where
    D: DocumentStore + ?Sized,
{
    let expired = store.find(&record::expired_before(now)).await?;
    let mut report = SweepReport {
        matched: expired.len(),
        ..SweepReport::default()
    };

    for doc in &expired {
        let Some(sid) = doc.get(SID_FIELD).and_then(Value::as_str) else {
            warn!("Expired document has no sid, skipping");
            report.failed += 1;
            continue;
        };

        match store.remove(&record::by_sid(sid), RemoveOptions::single()).await {
            Ok(removed) => {
                trace!(sid = %sid, "Removed expired session");
                report.removed += removed;
            }
            Err(e) => {
                warn!(sid = %sid, error = %e, "Failed to remove expired session");
                report.failed += 1;
            }
        }
    }

    match store.compact().await {
        Ok(()) => report.compacted = true,
        Err(e) => warn!(error = %e, "Compaction after sweep failed"),
    }

    Ok(report)
}

/// Handle to a running sweep task.
///
/// The task stops on [`SweeperHandle::shutdown`] and is aborted if the
/// handle is dropped first.
#[derive(Debug)]
pub struct SweeperHandle {
    interval: Duration,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Start sweeping `store` every `interval`, first tick one interval from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<D>(store: Arc<D>, interval: Duration) -> Self
    where
        D: DocumentStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match sweep_expired(store.as_ref(), Utc::now()).await {
                            Ok(report) if report.matched > 0 => info!(
                                matched = report.matched,
                                removed = report.removed,
                                failed = report.failed,
                                "Swept expired sessions"
                            ),
                            Ok(_) => trace!("Sweep found no expired sessions"),
                            Err(e) => warn!(error = %e, "Expired session scan failed, retrying next interval"),
                        }
                    }
                }
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "Sweeper started");

        Self {
            interval,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task, letting an in-progress sweep finish first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Sweeper task ended abnormally");
                }
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
