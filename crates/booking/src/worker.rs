use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::issuance::{Issuance, TicketIssuer};

const BATCH_SIZE: i64 = 20;
const BACKOFF_BASE_SECS: i64 = 30;
const BACKOFF_MAX_SECS: i64 = 3600;
/// Parked jobs sort after every real timestamp and are never due.
const PARKED_UNTIL: &str = "9999-12-31T23:59:59.999Z";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub issued: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub failed: usize,
}

/// Drains the issuance queue outside of any request cycle.
pub struct IssuanceWorker {
    pool: SqlitePool,
    issuer: Arc<TicketIssuer>,
    wake: Arc<Notify>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl IssuanceWorker {
    pub fn new(
        pool: SqlitePool,
        issuer: Arc<TicketIssuer>,
        wake: Arc<Notify>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self { pool, issuer, wake, poll_interval, max_attempts }
    }

    /// Process every job that is currently due.
    pub async fn run_once(&self) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();
        loop {
            let now = fcb_db::timestamp(Utc::now());
            let jobs = fcb_db::due_jobs(&self.pool, &now, BATCH_SIZE).await?;
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                match self.issuer.issue_ticket(job.reservation_id).await {
                    Ok(Issuance::InProgress) => {
                        // The claim holder may still fail; keep the job until it is settled.
                        report.deferred += 1;
                        let next = fcb_db::timestamp(Utc::now() + backoff(1));
                        fcb_db::defer_job(&self.pool, job.reservation_id, &next).await?;
                    }
                    Ok(outcome) => {
                        fcb_db::finish_job(&self.pool, job.reservation_id).await?;
                        match outcome {
                            Issuance::Issued { .. } => report.issued += 1,
                            _ => report.skipped += 1,
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        let attempts = job.attempts + 1;
                        let next = if attempts >= i64::from(self.max_attempts) {
                            error!(
                                reservation_id = job.reservation_id,
                                attempts,
                                "Ticket issuance gave up after repeated failures: {e}"
                            );
                            PARKED_UNTIL.to_string()
                        } else {
                            let delay = backoff(attempts);
                            warn!(
                                reservation_id = job.reservation_id,
                                attempts,
                                retry_in_secs = delay.num_seconds(),
                                "Ticket issuance failed, will retry: {e}"
                            );
                            fcb_db::timestamp(Utc::now() + delay)
                        };
                        fcb_db::reschedule_job(&self.pool, job.reservation_id, &next, &e.to_string()).await?;
                    }
                }
            }
        }
        if report != WorkerReport::default() {
            info!(
                issued = report.issued,
                skipped = report.skipped,
                deferred = report.deferred,
                failed = report.failed,
                "Issuance pass finished"
            );
        }
        Ok(report)
    }

    /// Run until `shutdown` flips to true. Wakes on the shared notifier or
    /// every poll interval, whichever comes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = self.poll_interval.as_secs(), "Issuance worker started");
        loop {
            if let Err(e) = self.run_once().await {
                error!("Issuance pass failed: {e}");
            }
            tokio::select! {
                _ = self.wake.notified() => debug!("Issuance worker woken"),
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Issuance worker stopped");
    }
}

/// Exponential backoff: 30 s, 60 s, 120 s … capped at one hour.
fn backoff(attempts: i64) -> chrono::Duration {
    let exponent = (attempts - 1).clamp(0, 16) as u32;
    let secs = BACKOFF_BASE_SECS.saturating_mul(1 << exponent).min(BACKOFF_MAX_SECS);
    chrono::Duration::seconds(secs)
}
