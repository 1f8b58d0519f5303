use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use petpal_social::MutationCoordinator;

/// Background task that enforces notification retention.
///
/// Reply counters are rebuilt once on startup; expired notifications are
/// pruned on every tick.
pub async fn run_sweep_loop(coordinator: MutationCoordinator, interval_secs: u64) {
    match coordinator.reconcile_reply_counts().await {
        Ok(0) => {}
        Ok(fixed) => info!("Sweep: repaired reply count on {} posts", fixed),
        Err(e) => warn!("Reply count reconcile failed: {}", e),
    }

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match coordinator.prune_expired_notifications(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: pruned {} expired notifications", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}
