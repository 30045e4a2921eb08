
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::pipeline::{EnrichmentPipeline, prepare_embedding_input};
use crate::config::ProcessorConfig;
use crate::database::sqlite::QueueItem;
use crate::embeddings::{EmbeddingRecord, EmbeddingStore};
use crate::queue::EnrichmentQueue;
use crate::versions::VersionStore;
use crate::{RecipeError, Result};

/// Runtime knobs of the processor, derived from `[processor]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub poll_interval: Duration,
    /// Upper bound on one summarize + embed round trip.
    pub pipeline_timeout: Duration,
    pub embed_token_budget: usize,
    /// `processing` items older than this are returned to `pending` on start
    /// and by a periodic sweep while the loop runs.
    pub stuck_after: chrono::Duration,
}

impl Default for ProcessorSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&ProcessorConfig::default())
    }
}

impl From<&ProcessorConfig> for ProcessorSettings {
    #[inline]
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            pipeline_timeout: config.pipeline_timeout(),
            embed_token_budget: config.embed_token_budget,
            stuck_after: config.stuck_after(),
        }
    }
}

/// Result of a single processor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Busy,
    /// Nothing pending.
    Idle,
    Completed(i64),
    Failed(i64),
}

/// Totals of a [`QueueProcessor::process_pending`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub completed: usize,
    pub failed: usize,
}

/// Single consumer of the enrichment queue.
///
/// Each tick claims at most one item, runs the pipeline under a timeout and
/// writes the summary and embedding back. Pipeline failures are recorded on
/// the item and never escape the tick.
pub struct QueueProcessor {
    queue: EnrichmentQueue,
    versions: Arc<VersionStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    pipeline: Arc<dyn EnrichmentPipeline>,
    settings: ProcessorSettings,
    in_flight: AtomicBool,
}

/// Clears the single-flight flag on every exit path, unwinding included.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running processor loop
#[derive(Debug)]
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Signal shutdown and wait for the loop to finish its current tick.
    #[inline]
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| RecipeError::Processing(format!("processor task failed: {e}")))
    }
}

impl QueueProcessor {
    #[inline]
    pub fn new(
        queue: EnrichmentQueue,
        versions: Arc<VersionStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        pipeline: Arc<dyn EnrichmentPipeline>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            versions,
            embeddings,
            pipeline,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Verify the pipeline and recover items left `processing` by a previous run.
    async fn prepare(&self) -> Result<()> {
        if let Err(e) = self.pipeline.check_ready() {
            error!("Enrichment processor refusing to start: {}", e);
            return Err(e);
        }
        self.queue.reset_stuck(self.settings.stuck_after).await?;
        Ok(())
    }

    /// Start the polling loop on the current runtime.
    #[inline]
    pub async fn start(self: Arc<Self>) -> Result<ProcessorHandle> {
        self.prepare().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            "Enrichment processor started (poll interval {:?}, timeout {:?})",
            self.settings.poll_interval, self.settings.pipeline_timeout
        );
        let join = tokio::spawn(self.run(shutdown_rx));

        Ok(ProcessorHandle {
            shutdown: shutdown_tx,
            join,
        })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let recovery_period = self.recovery_period();
        let mut recovery = tokio::time::interval_at(
            tokio::time::Instant::now() + recovery_period,
            recovery_period,
        );
        recovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Enrichment tick failed: {}", e);
                    }
                }
                _ = recovery.tick() => {
                    if let Err(e) = self.queue.reset_stuck(self.settings.stuck_after).await {
                        error!("Failed to recover stuck queue items: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Enrichment processor shutting down");
                    break;
                }
            }
        }
    }

    /// How often the loop returns stale `processing` items to `pending`.
    fn recovery_period(&self) -> Duration {
        self.settings
            .stuck_after
            .to_std()
            .unwrap_or(self.settings.poll_interval)
            .max(self.settings.poll_interval)
    }

    /// Work through the queue until it is empty, then return.
    #[inline]
    pub async fn process_pending(&self) -> Result<ProcessReport> {
        self.prepare().await?;

        let mut report = ProcessReport::default();
        loop {
            match self.tick().await? {
                TickOutcome::Completed(_) => report.completed += 1,
                TickOutcome::Failed(_) => report.failed += 1,
                TickOutcome::Idle => break,
                TickOutcome::Busy => tokio::time::sleep(self.settings.poll_interval).await,
            }
        }

        info!(
            "Processed queue: {} completed, {} failed",
            report.completed, report.failed
        );
        Ok(report)
    }

    /// Claim and enrich at most one item.
    #[inline]
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous tick still running, skipping");
            return Ok(TickOutcome::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let Some(item) = self.queue.pop_next().await? else {
            return Ok(TickOutcome::Idle);
        };
        debug!(
            "Claimed queue item {} for {} (version {})",
            item.id, item.short_id, item.version_id
        );

        let result = AssertUnwindSafe(self.enrich(&item))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(RecipeError::Processing(
                    "enrichment panicked".to_string(),
                ))
            });

        match result {
            Ok(()) => match self.queue.mark_completed(item.id).await {
                Ok(()) => {
                    info!("Enriched {} (queue item {})", item.short_id, item.id);
                    Ok(TickOutcome::Completed(item.id))
                }
                Err(e) => {
                    error!("Could not mark queue item {} completed: {}", item.id, e);
                    self.fail_item(&item, &format!("could not record completion: {e}"))
                        .await
                }
            },
            Err(e) => {
                let message = failure_message(&e);
                warn!(
                    "Enrichment failed for {} (queue item {}): {}",
                    item.short_id, item.id, message
                );
                self.fail_item(&item, &message).await
            }
        }
    }

    /// A claimed item that cannot be marked failed either stays `processing`
    /// until the recovery sweep returns it to `pending`.
    async fn fail_item(&self, item: &QueueItem, message: &str) -> Result<TickOutcome> {
        if let Err(e) = self.queue.mark_failed(item.id, message).await {
            error!(
                "Could not mark queue item {} failed, leaving it for recovery: {}",
                item.id, e
            );
            return Err(e);
        }
        Ok(TickOutcome::Failed(item.id))
    }

    async fn enrich(&self, item: &QueueItem) -> Result<()> {
        let version = self.versions.get_version_by_id(item.version_id).await?;
        let input = prepare_embedding_input(
            &version.title,
            &version.content,
            self.settings.embed_token_budget,
        );

        let pipeline = async {
            let summary = self
                .pipeline
                .summarize(&version.title, &version.content)
                .await?;
            let vector = self.pipeline.embed(&input).await?;
            Ok::<_, RecipeError>((summary, vector))
        };
        let (summary, vector) = tokio::time::timeout(self.settings.pipeline_timeout, pipeline)
            .await
            .map_err(|_| {
                RecipeError::Processing(format!(
                    "timeout after {}s",
                    self.settings.pipeline_timeout.as_secs_f32()
                ))
            })??;

        self.versions.set_summary(version.id, &summary).await?;

        // The recipe may have moved on while the pipeline ran.
        let latest = self.versions.get_version_by_id(version.id).await?;
        let record = EmbeddingRecord {
            version_id: latest.id,
            recipe_id: latest.recipe_id,
            vector,
            is_current: latest.is_current && latest.deleted_at.is_none(),
        };
        self.embeddings.upsert(&record).await?;

        debug!(
            "Stored summary and embedding for version {} (current: {})",
            record.version_id, record.is_current
        );
        Ok(())
    }
}

/// Error text stored on a failed queue item.
fn failure_message(error: &RecipeError) -> String {
    match error {
        RecipeError::Processing(message)
        | RecipeError::Embedding(message)
        | RecipeError::Network(message) => message.clone(),
        other => other.to_string(),
    }
}
