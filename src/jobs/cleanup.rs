use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

use crate::app::notifications::NotificationService;

/// Purges expired read notifications every `interval` until cancelled.
pub async fn run(service: NotificationService, interval: Duration) -> Result<()> {
    info!(
        retention_days = service.retention_days(),
        interval_seconds = interval.as_secs(),
        "notification cleanup worker started"
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(err) = service.cleanup_old().await {
            error!(error = ?err, "notification cleanup failed");
        }
    }
}
