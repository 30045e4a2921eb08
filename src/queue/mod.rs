// Durable enrichment queue
// One row per unit of enrichment work, keyed by version, with a pending/processing/completed/failed lifecycle


use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, info, warn};

use crate::database::sqlite::{Database, NewQueueItem, QueueItem, QueueStatus};
use crate::{RecipeError, Result};

const QUEUE_COLUMNS: &str = "id, title, short_id, version_id, status, error, created_at, \
                             started_at, completed_at, deleted_at";

/// Queue maintenance configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Completed and failed items older than this are soft-deleted by [`EnrichmentQueue::cleanup`]
    pub retention_days: u32,
}

impl Default for QueueConfig {
    #[inline]
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// Counts of non-deleted items per status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    #[inline]
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// FIFO of enrichment work backed by the `queue_items` table
#[derive(Debug, Clone)]
pub struct EnrichmentQueue {
    database: Database,
    config: QueueConfig,
}

impl EnrichmentQueue {
    #[inline]
    pub fn new(database: Database, config: QueueConfig) -> Self {
        Self { database, config }
    }

    /// Enqueue a version. If the version already has a pending or processing item, that item is
    /// returned and nothing is inserted.
    #[inline]
    pub async fn add(&self, item: &NewQueueItem) -> Result<QueueItem> {
        let now = Utc::now().naive_utc();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO queue_items (title, short_id, version_id, status, created_at) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(&item.title)
        .bind(&item.short_id)
        .bind(item.version_id)
        .bind(now)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        let active = self
            .active_for_version(item.version_id)
            .await?
            .ok_or_else(|| {
                RecipeError::Processing(format!(
                    "queue item for version {} vanished after insert",
                    item.version_id
                ))
            })?;

        if inserted == 0 {
            debug!(
                "Version {} already queued as item {} ({})",
                item.version_id, active.id, active.status
            );
        } else {
            debug!(
                "Queued version {} of '{}' as item {}",
                item.version_id, item.short_id, active.id
            );
        }
        Ok(active)
    }

    /// Claim the oldest pending item. The select and the status change are one statement, so two
    /// callers can never claim the same item.
    #[inline]
    pub async fn pop_next(&self) -> Result<Option<QueueItem>> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE queue_items
            SET status = 'processing', started_at = ?
            WHERE id = (
                SELECT id FROM queue_items
                WHERE status = 'pending' AND deleted_at IS NULL
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(now)
            .fetch_optional(self.database.pool())
            .await?;

        if let Some(item) = &item {
            debug!("Claimed queue item {} for version {}", item.id, item.version_id);
        }
        Ok(item)
    }

    #[inline]
    pub async fn mark_completed(&self, id: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        let updated = sqlx::query(
            "UPDATE queue_items SET status = 'completed', error = NULL, completed_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(id)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.not_processing(id).await);
        }
        Ok(())
    }

    /// Record a failure; the error text is kept for display and retry.
    #[inline]
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        let updated = sqlx::query(
            "UPDATE queue_items SET status = 'failed', error = ?, completed_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.not_processing(id).await);
        }
        Ok(())
    }

    async fn not_processing(&self, id: i64) -> RecipeError {
        match self.get(id).await {
            Ok(item) => RecipeError::Validation(format!(
                "queue item {id} is {}, not processing",
                item.status.as_str()
            )),
            Err(e) => e,
        }
    }

    /// Put a failed item back to pending. If another item for the same version became active in
    /// the meantime, the failed item is left alone and the active one is returned.
    #[inline]
    pub async fn retry(&self, id: i64) -> Result<QueueItem> {
        let updated = sqlx::query(
            "UPDATE OR IGNORE queue_items \
             SET status = 'pending', error = NULL, started_at = NULL, completed_at = NULL \
             WHERE id = ? AND status = 'failed' AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        let item = self.get(id).await?;
        if updated > 0 {
            info!("Queue item {} reset to pending", id);
            return Ok(item);
        }

        if item.status == QueueStatus::Failed && item.deleted_at.is_none() {
            if let Some(active) = self.active_for_version(item.version_id).await? {
                debug!(
                    "Version {} already has active item {}, leaving {} failed",
                    item.version_id, active.id, id
                );
                return Ok(active);
            }
        }

        Err(RecipeError::Validation(format!(
            "only failed items can be retried, item {id} is {}",
            item.status.as_str()
        )))
    }

    /// Reset every failed item to pending. Returns how many were reset.
    #[inline]
    pub async fn retry_all_errors(&self) -> Result<u64> {
        let updated = sqlx::query(
            "UPDATE OR IGNORE queue_items \
             SET status = 'pending', error = NULL, started_at = NULL, completed_at = NULL \
             WHERE status = 'failed' AND deleted_at IS NULL",
        )
        .execute(self.database.pool())
        .await?
        .rows_affected();

        if updated > 0 {
            info!("Reset {} failed queue items to pending", updated);
        }
        Ok(updated)
    }

    /// Failed items, most recent failure first.
    #[inline]
    pub async fn get_recent_errors(&self, limit: u32) -> Result<Vec<QueueItem>> {
        self.list_where(
            "status = 'failed' ORDER BY completed_at DESC, id DESC",
            limit,
        )
        .await
    }

    /// Items not yet finished (pending or processing), in the order they will be claimed.
    #[inline]
    pub async fn get_pending(&self, limit: u32) -> Result<Vec<QueueItem>> {
        self.list_where(
            "status IN ('pending', 'processing') ORDER BY created_at ASC, id ASC",
            limit,
        )
        .await
    }

    #[inline]
    pub async fn get_recent_completed(&self, limit: u32) -> Result<Vec<QueueItem>> {
        self.list_where(
            "status = 'completed' ORDER BY completed_at DESC, id DESC",
            limit,
        )
        .await
    }

    async fn list_where(&self, filter_and_order: &str, limit: u32) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_items WHERE deleted_at IS NULL AND {filter_and_order} LIMIT ?"
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(limit)
            .fetch_all(self.database.pool())
            .await?;
        Ok(items)
    }

    /// Soft-delete completed and failed items older than the retention window.
    #[inline]
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = Utc::now().naive_utc() - Duration::days(i64::from(self.config.retention_days));
        self.cleanup_before(cutoff).await
    }

    #[inline]
    pub async fn cleanup_before(&self, cutoff: NaiveDateTime) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let removed = sqlx::query(
            "UPDATE queue_items SET deleted_at = ? \
             WHERE deleted_at IS NULL AND status IN ('completed', 'failed') \
             AND COALESCE(completed_at, created_at) < ?",
        )
        .bind(now)
        .bind(cutoff)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        if removed > 0 {
            info!("Cleaned up {} finished queue items", removed);
        }
        Ok(removed)
    }

    #[inline]
    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = sqlx::query_as::<_, QueueStats>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
            FROM queue_items
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_one(self.database.pool())
        .await?;

        Ok(stats)
    }

    /// Return items left in `processing` for longer than `older_than` to `pending`.
    /// Used at start-up to recover work claimed by a process that died mid-item.
    #[inline]
    pub async fn reset_stuck(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now().naive_utc() - older_than;
        let reset = sqlx::query(
            "UPDATE queue_items SET status = 'pending', started_at = NULL \
             WHERE status = 'processing' AND deleted_at IS NULL \
             AND (started_at IS NULL OR started_at < ?)",
        )
        .bind(cutoff)
        .execute(self.database.pool())
        .await?
        .rows_affected();

        if reset > 0 {
            warn!("Reset {} stuck queue items to pending", reset);
        }
        Ok(reset)
    }

    #[inline]
    pub async fn get(&self, id: i64) -> Result<QueueItem> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue_items WHERE id = ?");
        sqlx::query_as::<_, QueueItem>(&sql)
            .bind(id)
            .fetch_optional(self.database.pool())
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("queue item {id}")))
    }

    /// The pending or processing item for a version, if any.
    #[inline]
    pub async fn active_for_version(&self, version_id: i64) -> Result<Option<QueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM queue_items \
             WHERE version_id = ? AND deleted_at IS NULL AND status IN ('pending', 'processing') \
             ORDER BY id DESC LIMIT 1"
        );
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(version_id)
            .fetch_optional(self.database.pool())
            .await?;
        Ok(item)
    }
}
