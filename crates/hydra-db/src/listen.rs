//! Change notifications for the jobset registry.

use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::DbResult;

/// Channels the jobset tables notify on. Payloads carry nothing
/// useful; any notification means "resync".
pub const JOBSET_CHANNELS: [&str; 3] = [
    "jobsets_added",
    "jobsets_deleted",
    "jobset_scheduling_changed",
];

/// A dedicated connection subscribed to jobset change notifications.
pub struct JobsetListener {
    listener: PgListener,
}

impl JobsetListener {
    pub async fn connect(pool: &PgPool) -> DbResult<Self> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen_all(JOBSET_CHANNELS).await?;
        Ok(Self { listener })
    }

    /// Block until any jobset change notification arrives.
    pub async fn next_event(&mut self) -> DbResult<()> {
        self.listener.recv().await?;
        Ok(())
    }
}
