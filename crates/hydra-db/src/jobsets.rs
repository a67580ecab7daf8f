//! Jobset storage operations.

use async_trait::async_trait;
use hydra_core::{EvaluationStyle, Jobset, JobsetName};
use sqlx::PgPool;

use crate::DbResult;

/// One row of the enabled-jobsets snapshot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobsetRow {
    pub project: String,
    pub name: String,
    pub last_checked_time: Option<i64>,
    pub trigger_time: Option<i64>,
    pub check_interval: i64,
    pub enabled: i32,
}

impl JobsetRow {
    pub fn jobset_name(&self) -> JobsetName {
        JobsetName::new(&self.project, &self.name)
    }

    /// Registry record for this row, or `None` when the enabled value
    /// does not map to a known evaluation style.
    pub fn to_jobset(&self) -> Option<Jobset> {
        let style = EvaluationStyle::from_db(self.enabled)?;
        Some(Jobset {
            name: self.jobset_name(),
            style,
            last_checked_time: self.last_checked_time.unwrap_or(0),
            trigger_time: self.trigger_time,
            check_interval: self.check_interval,
            pid: None,
        })
    }
}

/// Storage operations the scheduler needs.
#[async_trait]
pub trait JobsetStore: Send + Sync {
    /// Snapshot of every jobset enabled at both the jobset and the
    /// project level.
    async fn load_enabled(&self) -> DbResult<Vec<JobsetRow>>;

    /// Record that an evaluation of `name` is starting now.
    async fn mark_started(&self, name: &JobsetName, now: i64) -> DbResult<()>;

    /// Writeback after an evaluation child exited: clears the start
    /// marker, clears a trigger that predates the finished run, and
    /// records `error` when the child failed.
    async fn record_finished(
        &self,
        name: &JobsetName,
        now: i64,
        error: Option<&str>,
    ) -> DbResult<()>;

    /// Whether the most recent evaluation of `name` still has
    /// unfinished builds. False when the jobset was never evaluated.
    async fn previous_eval_busy(&self, name: &JobsetName) -> DbResult<bool>;

    /// Clear every start marker; returns the number of rows touched.
    async fn clear_start_times(&self) -> DbResult<u64>;
}

/// PostgreSQL implementation of [`JobsetStore`].
pub struct PgJobsetStore {
    pool: PgPool,
}

impl PgJobsetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobsetStore for PgJobsetStore {
    async fn load_enabled(&self) -> DbResult<Vec<JobsetRow>> {
        let rows = sqlx::query_as::<_, JobsetRow>(
            r#"
            SELECT j.project, j.name,
                   j.lastCheckedTime::int8 AS last_checked_time,
                   j.triggerTime::int8 AS trigger_time,
                   j.checkInterval::int8 AS check_interval,
                   j.enabled
            FROM jobsets j
            JOIN projects p ON j.project = p.name
            WHERE j.enabled != 0 AND p.enabled != 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_started(&self, name: &JobsetName, now: i64) -> DbResult<()> {
        sqlx::query("UPDATE jobsets SET startTime = $1 WHERE project = $2 AND name = $3")
            .bind(now)
            .bind(&name.project)
            .bind(&name.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_finished(
        &self,
        name: &JobsetName,
        now: i64,
        error: Option<&str>,
    ) -> DbResult<()> {
        let mut txn = self.pool.begin().await?;

        // Clear the trigger only when it predates the run that just
        // finished; a trigger that arrived mid-run must survive so the
        // jobset is evaluated again.
        sqlx::query(
            r#"
            UPDATE jobsets SET triggerTime = NULL
            WHERE project = $1 AND name = $2
              AND startTime IS NOT NULL AND triggerTime <= startTime
            "#,
        )
        .bind(&name.project)
        .bind(&name.name)
        .execute(&mut *txn)
        .await?;

        sqlx::query("UPDATE jobsets SET startTime = NULL WHERE project = $1 AND name = $2")
            .bind(&name.project)
            .bind(&name.name)
            .execute(&mut *txn)
            .await?;

        if let Some(message) = error {
            sqlx::query(
                r#"
                UPDATE jobsets
                SET errorMsg = $1, lastCheckedTime = $2, errorTime = $2, fetchErrorMsg = NULL
                WHERE project = $3 AND name = $4
                "#,
            )
            .bind(message)
            .bind(now)
            .bind(&name.project)
            .bind(&name.name)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn previous_eval_busy(&self, name: &JobsetName) -> DbResult<bool> {
        let mut txn = self.pool.begin().await?;

        let latest_eval: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobsetevals
            WHERE project = $1 AND jobset = $2
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(&name.project)
        .bind(&name.name)
        .fetch_optional(&mut *txn)
        .await?;

        let busy = match latest_eval {
            // Never evaluated; nothing to wait for.
            None => false,
            Some(eval_id) => {
                let unfinished: Option<i32> = sqlx::query_scalar(
                    r#"
                    SELECT b.id FROM builds b
                    JOIN jobsetevalmembers m ON m.build = b.id
                    WHERE m.eval = $1 AND b.finished = 0
                    LIMIT 1
                    "#,
                )
                .bind(eval_id)
                .fetch_optional(&mut *txn)
                .await?;
                unfinished.is_some()
            }
        };

        txn.commit().await?;
        Ok(busy)
    }

    async fn clear_start_times(&self) -> DbResult<u64> {
        let result = sqlx::query("UPDATE jobsets SET startTime = NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
