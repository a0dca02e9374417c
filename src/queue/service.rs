/*!
 * Translation request service.
 *
 * Owns the request lifecycle: creation with the active-tuple idempotence
 * guarantee, cancellation, retry, dedupe, progress and audit logs. All
 * writes to request status/progress/job fields go through here, and every
 * mutation is mirrored onto the event bus.
 */

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

use crate::database::{
    MediaKind, Repository, RequestListQuery, RequestLogRecord, RequestPage, RequestStatus,
    TranslatableSubtitle, TranslationRequestRecord,
};
use crate::translation::RequestReporter;
use crate::workers::pool::WorkerPool;
use super::events::{EventBus, RequestEvent};

/// Outcome of a reenqueue sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReenqueueOutcome {
    /// Rows re-signaled to the pool
    pub reenqueued: usize,
    /// Rows left untouched
    pub skipped: usize,
}

/// Service over the persistent request queue
#[derive(Clone)]
pub struct TranslationRequestService {
    repo: Repository,
    pool: Arc<WorkerPool>,
    events: EventBus,
}

impl TranslationRequestService {
    /// Create the service
    pub fn new(repo: Repository, pool: Arc<WorkerPool>, events: EventBus) -> Self {
        Self { repo, pool, events }
    }

    /// The event bus requests are mirrored onto
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a Pending request. Idempotent per active tuple: when an active
    /// request already exists its id is returned and nothing changes.
    pub async fn create_request(
        &self,
        subtitle: TranslatableSubtitle,
        force_priority: bool,
    ) -> Result<i64> {
        let (request_id, created) = self.repo.insert_request(&subtitle).await?;

        if created {
            self.repo
                .append_request_log(
                    request_id,
                    "info",
                    &format!(
                        "Queued translation {} -> {} for {:?}",
                        subtitle.source_language, subtitle.target_language, subtitle.title
                    ),
                    None,
                )
                .await?;
            self.events.publish(RequestEvent::StatusChanged {
                request_id,
                status: RequestStatus::Pending,
            });

            if force_priority {
                self.repo
                    .set_media_priority(subtitle.media_id, true)
                    .await?;
                self.pool
                    .notify_priority_changed(subtitle.media_kind, subtitle.media_id, true);
            }

            self.pool.signal();
        }

        Ok(request_id)
    }

    /// Cancel a request. Pending rows transition synchronously; running rows
    /// get their token cancelled and the worker drives the transition.
    pub async fn cancel(&self, request_id: i64) -> Result<TranslationRequestRecord> {
        let request = self
            .repo
            .get_request(request_id)
            .await?
            .with_context(|| format!("Request {} not found", request_id))?;

        match request.status {
            RequestStatus::Pending => {
                self.pool.cancel_job(request_id);
                self.mark_cancelled(request_id).await?;
            }
            RequestStatus::InProgress => {
                if !self.pool.cancel_job(request_id) {
                    // No live worker holds this request (e.g. after a crash
                    // swept wrongly); resolve it directly
                    warn!(
                        "Request {} is InProgress without a registered job, cancelling directly",
                        request_id
                    );
                    self.mark_cancelled(request_id).await?;
                } else {
                    self.repo
                        .append_request_log(request_id, "info", "Cancellation requested", None)
                        .await?;
                }
            }
            _ => {}
        }

        self.repo
            .get_request(request_id)
            .await?
            .with_context(|| format!("Request {} disappeared", request_id))
    }

    /// Delete a request row; rejected while a worker is running it
    pub async fn remove(&self, request_id: i64) -> Result<()> {
        let request = self
            .repo
            .get_request(request_id)
            .await?
            .with_context(|| format!("Request {} not found", request_id))?;

        if request.status == RequestStatus::InProgress {
            bail!("Cannot remove request {} while it is running", request_id);
        }

        self.repo.delete_request(request_id).await?;
        Ok(())
    }

    /// Clone a historical request into a fresh Pending row
    pub async fn retry(&self, request_id: i64) -> Result<i64> {
        let request = self
            .repo
            .get_request(request_id)
            .await?
            .with_context(|| format!("Request {} not found", request_id))?;

        if request.status.is_active() {
            bail!("Request {} is still active, nothing to retry", request_id);
        }

        let (new_id, created) = self
            .repo
            .clone_request_as_pending(request_id)
            .await?
            .with_context(|| format!("Request {} disappeared", request_id))?;

        if created {
            self.repo
                .append_request_log(
                    new_id,
                    "info",
                    &format!("Retried from request {}", request_id),
                    None,
                )
                .await?;
            self.events.publish(RequestEvent::StatusChanged {
                request_id: new_id,
                status: RequestStatus::Pending,
            });
        }

        self.pool.signal();
        Ok(new_id)
    }

    /// Re-signal the pool for still-queued rows; optionally reset rows that
    /// claim to be running (used after configuration changes)
    pub async fn reenqueue_queued(&self, include_in_progress: bool) -> Result<ReenqueueOutcome> {
        let rows = self.repo.get_queued_requests(include_in_progress).await?;
        let mut reenqueued = 0;
        let mut skipped = 0;

        for row in rows {
            match row.status {
                RequestStatus::Pending => reenqueued += 1,
                RequestStatus::InProgress if include_in_progress => {
                    self.repo
                        .transition_request(row.id, RequestStatus::Pending)
                        .await?;
                    self.repo
                        .append_request_log(row.id, "info", "Re-enqueued by operator", None)
                        .await?;
                    reenqueued += 1;
                }
                _ => skipped += 1,
            }
        }

        if reenqueued > 0 {
            self.pool.signal();
        }
        Ok(ReenqueueOutcome {
            reenqueued,
            skipped,
        })
    }

    /// Merge duplicate active rows, keeping the lowest id per tuple
    pub async fn dedupe_queued_requests(&self) -> Result<usize> {
        let removed = self.repo.dedupe_active_requests().await?;
        if removed > 0 {
            info!("Deduplicated {} queued request rows", removed);
        }
        Ok(removed)
    }

    /// Audit log of one request
    pub async fn get_logs(&self, request_id: i64) -> Result<Vec<RequestLogRecord>> {
        self.repo.get_request_logs(request_id).await
    }

    /// Number of pending plus running requests
    pub async fn get_active_count(&self) -> Result<i64> {
        self.repo.get_active_request_count().await
    }

    /// Paginated, filtered listing
    pub async fn list(&self, query: RequestListQuery) -> Result<RequestPage> {
        self.repo.list_requests(query).await
    }

    /// Fetch one request
    pub async fn get(&self, request_id: i64) -> Result<Option<TranslationRequestRecord>> {
        self.repo.get_request(request_id).await
    }

    /// Forward a priority flip to any waiter in the pool
    pub async fn refresh_priority_for_media(
        &self,
        media_kind: MediaKind,
        media_id: i64,
    ) -> Result<()> {
        let media = self.repo.get_media_by_kind(media_kind, media_id).await?;
        let priority = media.map(|m| m.is_priority).unwrap_or(false);
        self.pool
            .notify_priority_changed(media_kind, media_id, priority);
        Ok(())
    }

    /// Startup sweep: rows left InProgress by a dead process become
    /// Interrupted
    pub async fn sweep_interrupted(&self) -> Result<usize> {
        let swept = self.repo.interrupt_in_progress_requests().await?;
        if swept > 0 {
            warn!("Marked {} orphaned running requests as interrupted", swept);
        }
        Ok(swept)
    }

    // -------------------------------------------------------------------
    // Worker-side transitions (called by the dispatcher)
    // -------------------------------------------------------------------

    /// Move a request into InProgress under a fresh job id
    pub async fn mark_in_progress(&self, request_id: i64, job_id: &str) -> Result<()> {
        self.repo
            .assign_request_job(request_id, job_id.to_string())
            .await?;
        self.events.publish(RequestEvent::StatusChanged {
            request_id,
            status: RequestStatus::InProgress,
        });
        Ok(())
    }

    /// Terminal success
    pub async fn mark_completed(&self, request_id: i64) -> Result<()> {
        self.repo.update_request_progress(request_id, 100).await?;
        self.finish(request_id, RequestStatus::Completed, "Translation completed")
            .await
    }

    /// Terminal failure with the error kind in the log
    pub async fn mark_failed(&self, request_id: i64, kind: &str, detail: &str) -> Result<()> {
        self.repo
            .append_request_log(request_id, "error", kind, Some(detail.to_string()))
            .await?;
        self.finish(request_id, RequestStatus::Failed, "Translation failed")
            .await
    }

    /// Terminal cancellation
    pub async fn mark_cancelled(&self, request_id: i64) -> Result<()> {
        self.finish(request_id, RequestStatus::Cancelled, "Translation cancelled")
            .await
    }

    /// The worker observed a pause condition: the request goes back to
    /// Pending and will be rescheduled
    pub async fn mark_paused(&self, request_id: i64, reason: &str) -> Result<()> {
        self.repo
            .append_request_log(request_id, "warn", "Paused", Some(reason.to_string()))
            .await?;
        self.repo
            .transition_request(request_id, RequestStatus::Pending)
            .await?;
        self.pool.unregister_cancellation(request_id);
        self.events.publish(RequestEvent::StatusChanged {
            request_id,
            status: RequestStatus::Pending,
        });
        Ok(())
    }

    async fn finish(
        &self,
        request_id: i64,
        status: RequestStatus,
        message: &str,
    ) -> Result<()> {
        self.repo
            .append_request_log(request_id, "info", message, None)
            .await?;
        self.repo.transition_request(request_id, status).await?;
        self.pool.unregister_cancellation(request_id);
        self.events.publish(RequestEvent::StatusChanged {
            request_id,
            status,
        });
        Ok(())
    }
}

#[async_trait]
impl RequestReporter for TranslationRequestService {
    async fn progress(&self, request_id: i64, progress: i64) {
        if let Err(e) = self.repo.update_request_progress(request_id, progress).await {
            warn!("Failed to persist progress for request {}: {}", request_id, e);
        }
        self.events.publish(RequestEvent::Progress {
            request_id,
            progress,
        });
    }

    async fn log(&self, request_id: i64, level: &str, message: &str, details: Option<String>) {
        if let Err(e) = self
            .repo
            .append_request_log(request_id, level, message, details)
            .await
        {
            warn!("Failed to append log for request {}: {}", request_id, e);
        }
        self.events.publish(RequestEvent::Log {
            request_id,
            level: level.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MediaRecord, TranslationState};

    async fn service() -> (TranslationRequestService, Repository) {
        let repo = Repository::new_in_memory().unwrap();
        let pool = WorkerPool::new(2);
        let service = TranslationRequestService::new(repo.clone(), pool, EventBus::new());
        (service, repo)
    }

    async fn seed_media(repo: &Repository) -> i64 {
        repo.upsert_media(&MediaRecord {
            id: 0,
            external_id: 1,
            kind: MediaKind::Movie,
            season_id: None,
            title: "Example".into(),
            path: "/library/Example".into(),
            file_name: "Example.mkv".into(),
            date_added: "2020-01-01T00:00:00Z".into(),
            exclude_from_translation: false,
            is_priority: false,
            priority_date: None,
            translation_age_threshold: None,
            translation_state: TranslationState::Pending,
            indexed_at: None,
            state_settings_version: 0,
            last_subtitle_check_at: None,
        })
        .await
        .unwrap()
    }

    fn subtitle(media_id: i64) -> TranslatableSubtitle {
        TranslatableSubtitle {
            media_id,
            media_kind: MediaKind::Movie,
            title: "Example".into(),
            source_language: "en".into(),
            target_language: "ro".into(),
            subtitle_path: None,
        }
    }

    #[tokio::test]
    async fn test_create_request_is_idempotent_per_active_tuple() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;

        let first = service.create_request(subtitle(media_id), false).await.unwrap();
        let second = service.create_request(subtitle(media_id), false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.get_active_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_request_emits_event_and_log() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let mut events = service.events().subscribe();

        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            RequestEvent::StatusChanged {
                status: RequestStatus::Pending,
                ..
            }
        ));
        assert_eq!(event.request_id(), request_id);

        let logs = service.get_logs(request_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].message.contains("Queued"));
    }

    #[tokio::test]
    async fn test_cancel_pending_transitions_synchronously() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();

        let cancelled = service.cancel(request_id).await.unwrap();

        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(cancelled.is_active, None);
    }

    #[tokio::test]
    async fn test_remove_rejects_running_requests() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();
        service.mark_in_progress(request_id, "job-1").await.unwrap();

        assert!(service.remove(request_id).await.is_err());

        service.mark_completed(request_id).await.unwrap();
        service.remove(request_id).await.unwrap();
        assert!(service.get(request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_clones_terminal_request() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();

        // Active requests cannot be retried
        assert!(service.retry(request_id).await.is_err());

        service.mark_failed(request_id, "TimedOut", "wall clock exceeded").await.unwrap();
        let retried = service.retry(request_id).await.unwrap();

        assert_ne!(retried, request_id);
        let old = service.get(request_id).await.unwrap().unwrap();
        let new = service.get(retried).await.unwrap().unwrap();
        assert_eq!(old.status, RequestStatus::Failed);
        assert_eq!(new.status, RequestStatus::Pending);
        assert_eq!(new.dedupe_key(), old.dedupe_key());
    }

    #[tokio::test]
    async fn test_mark_paused_returns_request_to_pending() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();
        service.mark_in_progress(request_id, "job-1").await.unwrap();

        service
            .mark_paused(request_id, "daily limit reached")
            .await
            .unwrap();

        let request = service.get(request_id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        // Not marked failed; the pause shows up in the log instead
        let logs = service.get_logs(request_id).await.unwrap();
        assert!(logs.iter().any(|l| l.message == "Paused"));
    }

    #[tokio::test]
    async fn test_reenqueue_counts_pending_and_optionally_resets_running() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let pending = service.create_request(subtitle(media_id), false).await.unwrap();

        let mut other = subtitle(media_id);
        other.target_language = "fr".into();
        let running = service.create_request(other, false).await.unwrap();
        service.mark_in_progress(running, "job-1").await.unwrap();

        let outcome = service.reenqueue_queued(false).await.unwrap();
        assert_eq!(outcome.reenqueued, 1);

        let outcome = service.reenqueue_queued(true).await.unwrap();
        assert_eq!(outcome.reenqueued, 2);

        let reset = service.get(running).await.unwrap().unwrap();
        assert_eq!(reset.status, RequestStatus::Pending);
        let untouched = service.get(pending).await.unwrap().unwrap();
        assert_eq!(untouched.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_interrupted_flips_running_rows() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();
        service.mark_in_progress(request_id, "job-1").await.unwrap();

        let swept = service.sweep_interrupted().await.unwrap();
        assert_eq!(swept, 1);

        let request = service.get(request_id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_progress_reporter_persists_and_publishes() {
        let (service, repo) = service().await;
        let media_id = seed_media(&repo).await;
        let request_id = service.create_request(subtitle(media_id), false).await.unwrap();
        let mut events = service.events().subscribe();
        // Drain the creation event
        let _ = events.recv().await.unwrap();

        RequestReporter::progress(&service, request_id, 40).await;

        let request = service.get(request_id).await.unwrap().unwrap();
        assert_eq!(request.progress, 40);
        assert!(matches!(
            events.recv().await.unwrap(),
            RequestEvent::Progress { progress: 40, .. }
        ));
    }
}
