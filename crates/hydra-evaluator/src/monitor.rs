//! Registry monitor: keeps the in-memory jobset registry in sync
//! with the database via change notifications.

use std::sync::Arc;
use std::time::Duration;

use hydra_db::{DbResult, JobsetListener, PgPool};
use tracing::{error, info};

use crate::scheduler::Evaluator;

/// Watch the jobset notification channels forever. Any failure drops
/// the listener connection, pauses, and reconnects.
pub async fn run_monitor(evaluator: Arc<Evaluator>, pool: PgPool) {
    loop {
        if let Err(e) = watch_jobsets(&evaluator, &pool).await {
            error!(error = %e, "database monitor error");
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

/// Subscribe first, then sync before the first wait, so a change
/// committed between subscription and the wait is never lost.
async fn watch_jobsets(evaluator: &Evaluator, pool: &PgPool) -> DbResult<()> {
    let mut listener = JobsetListener::connect(pool).await?;
    loop {
        evaluator.sync_registry().await?;
        evaluator.wakeup.notify_one();
        listener.next_event().await?;
        info!("received jobset event");
    }
}
