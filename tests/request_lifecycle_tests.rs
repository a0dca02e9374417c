/*!
 * Request lifecycle scenarios: deduplication, cancellation, retry and the
 * dispatcher driving a request end to end through the worker pool.
 */

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{srt_with_cues, test_app};
use translarr::database::{MediaKind, RequestStatus, TranslatableSubtitle};
use translarr::providers::mock::{MockBehavior, MockProvider};
use translarr::workers::Dispatcher;

fn subtitle(media_id: i64, sidecar: &std::path::Path) -> TranslatableSubtitle {
    TranslatableSubtitle {
        media_id,
        media_kind: MediaKind::Movie,
        title: "Movie".into(),
        source_language: "en".into(),
        target_language: "ro".into(),
        subtitle_path: Some(sidecar.to_string_lossy().to_string()),
    }
}

#[tokio::test]
async fn duplicate_creation_yields_one_active_row() {
    let app = test_app(Arc::new(MockProvider::working())).await;
    let (media, sidecar) = app.add_movie_with_sidecar(1, &srt_with_cues(1)).await;

    // Two concurrent creates for the same tuple
    let (a, b) = tokio::join!(
        app.service.create_request(subtitle(media.id, &sidecar), false),
        app.service.create_request(subtitle(media.id, &sidecar), false),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    assert_eq!(app.service.get_active_count().await.unwrap(), 1);

    // After completion a new active row may be created again
    app.service.mark_in_progress(a, "job").await.unwrap();
    app.service.mark_completed(a).await.unwrap();

    let c = app
        .service
        .create_request(subtitle(media.id, &sidecar), false)
        .await
        .unwrap();
    assert_ne!(c, a);
    assert_eq!(app.service.get_active_count().await.unwrap(), 1);

    // History row and fresh active row coexist
    let old = app.service.get(a).await.unwrap().unwrap();
    assert_eq!(old.status, RequestStatus::Completed);
    assert_eq!(old.is_active, None);
}

#[tokio::test]
async fn dispatcher_runs_request_to_completion() {
    let app = test_app(Arc::new(MockProvider::working())).await;
    let (media, sidecar) = app.add_movie_with_sidecar(1, &srt_with_cues(3)).await;

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        app.repo.clone(),
        app.service.clone(),
        app.pipeline.clone(),
        app.pool.clone(),
        app.settings.clone(),
        app.state_engine.clone(),
        shutdown.clone(),
    );
    let handle = dispatcher.spawn();

    let request_id = app
        .service
        .create_request(subtitle(media.id, &sidecar), false)
        .await
        .unwrap();

    // Wait for the worker to finish the request
    let mut status = RequestStatus::Pending;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = app.service.get(request_id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
    }

    assert_eq!(status, RequestStatus::Completed);
    let request = app.service.get(request_id).await.unwrap().unwrap();
    assert_eq!(request.progress, 100);
    assert!(request.job_id.is_some());
    assert_eq!(request.is_active, None);

    shutdown.cancel();
    app.pool.signal();
    let _ = handle.await;
}

#[tokio::test]
async fn dispatcher_pauses_request_when_provider_requires_payment() {
    let app = test_app(Arc::new(MockProvider::new(MockBehavior::PaymentRequired))).await;
    let (media, sidecar) = app.add_movie_with_sidecar(1, &srt_with_cues(1)).await;

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        app.repo.clone(),
        app.service.clone(),
        app.pipeline.clone(),
        app.pool.clone(),
        app.settings.clone(),
        app.state_engine.clone(),
        shutdown.clone(),
    );
    let handle = dispatcher.spawn();

    let request_id = app
        .service
        .create_request(subtitle(media.id, &sidecar), false)
        .await
        .unwrap();

    // The request bounces back to Pending with a Paused log entry
    let mut paused = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let logs = app.service.get_logs(request_id).await.unwrap();
        if logs.iter().any(|l| l.message == "Paused") {
            paused = true;
            break;
        }
    }
    shutdown.cancel();
    app.pool.signal();
    let _ = handle.await;

    assert!(paused, "expected a Paused log entry");
    let request = app.service.get(request_id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
}

#[tokio::test]
async fn cancel_mid_run_transitions_to_cancelled() {
    // Slow provider so cancellation lands while the worker is running
    let app = test_app(Arc::new(MockProvider::new(MockBehavior::Slow {
        delay_ms: 400,
    })))
    .await;
    let (media, sidecar) = app.add_movie_with_sidecar(1, &srt_with_cues(2)).await;

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        app.repo.clone(),
        app.service.clone(),
        app.pipeline.clone(),
        app.pool.clone(),
        app.settings.clone(),
        app.state_engine.clone(),
        shutdown.clone(),
    );
    let handle = dispatcher.spawn();

    let request_id = app
        .service
        .create_request(subtitle(media.id, &sidecar), false)
        .await
        .unwrap();

    // Wait for the request to start, then cancel it
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = app.service.get(request_id).await.unwrap().unwrap().status;
        if status == RequestStatus::InProgress {
            break;
        }
    }
    app.service.cancel(request_id).await.unwrap();

    let mut status = RequestStatus::InProgress;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = app.service.get(request_id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
    }
    shutdown.cancel();
    app.pool.signal();
    let _ = handle.await;

    assert_eq!(status, RequestStatus::Cancelled);
    // No partial target file is left behind
    let dir = std::path::Path::new(&media.path);
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".ro."))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn retry_of_failed_request_creates_fresh_pending_row() {
    let app = test_app(Arc::new(MockProvider::working())).await;
    let (media, sidecar) = app.add_movie_with_sidecar(1, &srt_with_cues(1)).await;

    let request_id = app
        .service
        .create_request(subtitle(media.id, &sidecar), false)
        .await
        .unwrap();
    app.service.mark_in_progress(request_id, "job").await.unwrap();
    app.service
        .mark_failed(request_id, "TransientProviderError", "gave up")
        .await
        .unwrap();

    let retried = app.service.retry(request_id).await.unwrap();
    assert_ne!(retried, request_id);

    let fresh = app.service.get(retried).await.unwrap().unwrap();
    assert_eq!(fresh.status, RequestStatus::Pending);
    assert_eq!(fresh.progress, 0);

    // The failed row stays as history
    let old = app.service.get(request_id).await.unwrap().unwrap();
    assert_eq!(old.status, RequestStatus::Failed);
}
