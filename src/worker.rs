// src/worker.rs
//
// Periodic housekeeping: outbox delivery, feature window expiry, abandoned
// checkouts, purge of old rejected listings.

use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

use crate::{AppState, features, moderation, notify, purchases};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub notifications: notify::DispatchReport,
    pub features_expired: u64,
    pub purchases_expired: u64,
    pub rejected_images_removed: usize,
}

pub fn start_background_jobs(state: AppState) {
    let interval = StdDuration::from_secs(state.config.worker.interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            let report = run_once(&state).await;
            if report != TickReport::default() {
                log::info!("worker tick {:?}", report);
            }
            tokio::time::sleep(interval).await;
        }
    });
}

/// One pass over every job. Failures are logged and the remaining jobs still run.
pub async fn run_once(state: &AppState) -> TickReport {
    let now = Utc::now();
    let worker = &state.config.worker;
    let mut report = TickReport::default();

    match notify::dispatch_pending(&state.pool, &state.email, worker.batch_size).await {
        Ok(r) => report.notifications = r,
        Err(e) => log::error!("notification dispatch error: {e}"),
    }

    match features::sweep_expired(&state.pool, now).await {
        Ok(n) => report.features_expired = n,
        Err(e) => log::error!("feature sweep error: {e}"),
    }

    match purchases::expire_stale(&state.pool, Duration::hours(worker.purchase_ttl_hours), now).await {
        Ok(n) => report.purchases_expired = n,
        Err(e) => log::error!("purchase expiry error: {e}"),
    }

    match moderation::purge_rejected(
        &state.pool,
        Duration::days(worker.rejected_retention_days),
        now,
    )
    .await
    {
        Ok(keys) => {
            state.storage.delete_best_effort(&keys).await;
            report.rejected_images_removed = keys.len();
        }
        Err(e) => log::error!("rejected purge error: {e}"),
    }

    report
}
