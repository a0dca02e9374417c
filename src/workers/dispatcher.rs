/*!
 * Queue dispatcher.
 *
 * Polls the persistent queue, acquires a pool slot per pending request
 * (priority read at acquire time) and runs the pipeline on a worker task.
 * Every exit path releases the slot and drives the request into its
 * terminal state; the per-request wall-clock timeout and pause conditions
 * are handled here.
 */

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::database::{Repository, RequestStatus, TranslationRequestRecord};
use crate::errors::TranslationError;
use crate::media::MediaStateEngine;
use crate::queue::TranslationRequestService;
use crate::settings::SettingsStore;
use crate::translation::SubtitlePipeline;
use super::pool::WorkerPool;

/// Queue poll interval when no signal arrives
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Dispatcher over the translation worker pool
pub struct Dispatcher {
    repo: Repository,
    service: TranslationRequestService,
    pipeline: SubtitlePipeline,
    pool: Arc<WorkerPool>,
    settings: SettingsStore,
    state_engine: MediaStateEngine,
    shutdown: CancellationToken,
    dispatched: Arc<Mutex<HashSet<i64>>>,
}

impl Dispatcher {
    /// Create the dispatcher
    pub fn new(
        repo: Repository,
        service: TranslationRequestService,
        pipeline: SubtitlePipeline,
        pool: Arc<WorkerPool>,
        settings: SettingsStore,
        state_engine: MediaStateEngine,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            service,
            pipeline,
            pool,
            settings,
            state_engine,
            shutdown,
            dispatched: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Run the dispatch loop until shutdown
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Dispatcher started");
            loop {
                if self.shutdown.is_cancelled() {
                    break;
                }

                if let Err(e) = self.tick().await {
                    error!("Dispatch tick failed: {}", e);
                }

                tokio::select! {
                    _ = self.pool.wait_for_signal(POLL_INTERVAL) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
            info!("Dispatcher stopped");
        })
    }

    /// One poll: sync the pool size and hand out pending requests
    async fn tick(&self) -> anyhow::Result<()> {
        let max_workers = self.settings.max_workers().await?;
        if max_workers != self.pool.max_workers() {
            self.pool.reconfigure(max_workers);
        }

        let candidates = self
            .repo
            .next_pending_requests((max_workers * 2) as i64)
            .await?;

        for request in candidates {
            let claimed = self.dispatched.lock().insert(request.id);
            if !claimed {
                continue;
            }

            let dispatcher = self.clone_refs();
            tokio::spawn(async move {
                dispatcher.run_request(request).await;
            });
        }

        Ok(())
    }

    fn clone_refs(&self) -> Arc<DispatchWorker> {
        Arc::new(DispatchWorker {
            repo: self.repo.clone(),
            service: self.service.clone(),
            pipeline: self.pipeline.clone(),
            pool: self.pool.clone(),
            settings: self.settings.clone(),
            state_engine: self.state_engine.clone(),
            dispatched: self.dispatched.clone(),
        })
    }
}

struct DispatchWorker {
    repo: Repository,
    service: TranslationRequestService,
    pipeline: SubtitlePipeline,
    pool: Arc<WorkerPool>,
    settings: SettingsStore,
    state_engine: MediaStateEngine,
    dispatched: Arc<Mutex<HashSet<i64>>>,
}

impl DispatchWorker {
    async fn run_request(&self, request: TranslationRequestRecord) {
        let request_id = request.id;
        let result = self.execute(request).await;
        if let Err(e) = result {
            error!("Worker for request {} failed to settle: {}", request_id, e);
        }
        self.dispatched.lock().remove(&request_id);
    }

    async fn execute(&self, request: TranslationRequestRecord) -> anyhow::Result<()> {
        let token = self.pool.register_cancellation(request.id);

        // Priority is read from the media row at acquire time
        let priority = self
            .repo
            .get_media_by_kind(request.media_kind, request.media_id)
            .await?
            .map(|m| m.is_priority)
            .unwrap_or(false);

        let permit = match self
            .pool
            .acquire(request.id, request.media_kind, request.media_id, priority, &token)
            .await
        {
            Ok(permit) => permit,
            Err(_) => {
                // Cancelled while queued
                self.service.mark_cancelled(request.id).await?;
                return Ok(());
            }
        };

        // The operator may have resolved the request while we waited
        let Some(current) = self.repo.get_request(request.id).await? else {
            self.pool.unregister_cancellation(request.id);
            return Ok(());
        };
        if current.status != RequestStatus::Pending {
            debug!(
                "Request {} is {} after slot acquisition, skipping",
                request.id, current.status
            );
            self.pool.unregister_cancellation(request.id);
            return Ok(());
        }

        let job_id = Uuid::new_v4().to_string();
        self.service.mark_in_progress(request.id, &job_id).await?;

        let timeout_minutes = self
            .settings
            .translation_settings()
            .await
            .map(|s| s.request_timeout_minutes)
            .unwrap_or(120);
        let budget = Duration::from_secs(timeout_minutes * 60);

        let outcome = tokio::time::timeout(
            budget,
            self.pipeline.run(&current, &token, &self.service),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => {
                self.service.mark_completed(request.id).await?;
                info!(
                    "Request {} completed: {:?}",
                    request.id,
                    result.output_path.file_name().unwrap_or_default()
                );
                if let Err(e) = self
                    .state_engine
                    .on_request_completed(current.media_id, current.media_kind)
                    .await
                {
                    warn!("State refresh after request {} failed: {}", request.id, e);
                }
            }
            Ok(Err(TranslationError::Cancelled)) => {
                self.service.mark_cancelled(request.id).await?;
            }
            Ok(Err(e)) if token.is_cancelled() => {
                debug!("Request {} cancelled mid-failure: {}", request.id, e);
                self.service.mark_cancelled(request.id).await?;
            }
            Ok(Err(e)) if e.keeps_request_pending() => {
                self.service.mark_paused(request.id, &e.to_string()).await?;
            }
            Ok(Err(e)) => {
                self.service
                    .mark_failed(request.id, e.kind(), &e.to_string())
                    .await?;
                if let Err(e) = self
                    .state_engine
                    .on_request_failed(current.media_id, current.media_kind)
                    .await
                {
                    warn!("State update after failed request {} failed: {}", request.id, e);
                }
            }
            Err(_elapsed) => {
                token.cancel();
                let timeout_error = TranslationError::TimedOut(timeout_minutes);
                self.service
                    .mark_failed(request.id, timeout_error.kind(), &timeout_error.to_string())
                    .await?;
            }
        }

        drop(permit);
        Ok(())
    }
}
