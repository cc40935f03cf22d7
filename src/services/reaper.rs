//! Background sweep for stalled uploads.
//!
//! Runs independently of request handling: a dedicated task wakes on a
//! fixed interval and asks the relay to evict uploads that never reached
//! EOF within the timeout window. Errors in a pass are logged and the pass
//! is skipped; the loop keeps going.

use crate::services::relay_service::RelayService;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

/// Spawn the sweep loop. The handle is detached by the caller for the
/// lifetime of the process; aborting it stops future passes only.
pub fn spawn(relay: RelayService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run(relay, interval))
}

async fn run(relay: RelayService, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "sweep loop started");

    loop {
        tokio::time::sleep(interval).await;

        match relay.sweep_stale().await {
            Ok(0) => trace!("sweep pass found nothing to evict"),
            Ok(evicted) => info!(evicted, "sweep pass evicted stalled uploads"),
            Err(err) => warn!("sweep pass failed, will retry next interval: {}", err),
        }
    }
}
