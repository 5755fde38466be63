//! Network task publishing cycle reports to the cloud database

use log::{debug, error, info};
use tokio::sync::watch;

use crate::config::RetryPolicy;
use crate::database::operations::readings_payload;
use crate::database::{execute_with_retry, CloudStore};
use crate::models::CycleReport;

/// Publish every report the acquisition loop hands over
///
/// Only the latest report is kept: one that arrives while a write is still
/// retrying replaces any not yet sent. A write that exhausts its retries is
/// dropped and acquisition is never blocked. Returns once the sending side
/// is gone.
pub async fn run_sync_task<S>(
    store: S,
    policy: RetryPolicy,
    mut reports: watch::Receiver<Option<CycleReport>>,
) where
    S: CloudStore + Sync,
{
    info!("Sync task started");
    while reports.changed().await.is_ok() {
        let Some(report) = reports.borrow_and_update().clone() else {
            continue;
        };

        let payload = readings_payload(&report);
        let store = &store;
        let values = &payload;
        match execute_with_retry(&policy, "publish readings", move || store.set_values(values)).await
        {
            Ok(()) => debug!("Published readings for tick {} ms", report.tick_ms),
            Err(e) => error!(
                "Dropping readings for tick {} ms: {}",
                report.tick_ms, e
            ),
        }
    }
    info!("Sync task stopped");
}
