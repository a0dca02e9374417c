/*!
 * Server-sent event streams.
 *
 * Each event is one `data: <json>` line; a heartbeat comment goes out every
 * 15 seconds of silence. The log stream replays recent entries on connect
 * before switching to live events.
 */

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::queue::RequestEvent;
use super::AppState;

/// Heartbeat interval
const HEARTBEAT: Duration = Duration::from_secs(15);

/// Log entries replayed on connect
const REPLAY_COUNT: i64 = 50;

fn data_event<T: serde::Serialize>(payload: &T) -> Event {
    Event::default().data(serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()))
}

/// Turn the broadcast receiver into an SSE stream, skipping lag gaps
fn event_stream(
    rx: broadcast::Receiver<RequestEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(data_event(&event)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("SSE subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// `GET /api/logs/stream`: recent request log entries, then live events
pub async fn log_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let recent = state
        .repo
        .get_recent_request_logs(REPLAY_COUNT)
        .await
        .unwrap_or_default();

    let replay: Vec<Result<Event, Infallible>> = recent
        .iter()
        .map(|entry| {
            Ok(data_event(&json!({
                "type": "log",
                "request_id": entry.request_id,
                "level": entry.level,
                "message": entry.message,
                "created_at": entry.created_at,
            })))
        })
        .collect();

    let live = event_stream(state.service.events().subscribe());

    Sse::new(stream::iter(replay).chain(live))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTranslationParams {
    /// Line to translate
    pub line: Option<String>,
    pub source_language: String,
    pub target_language: String,
}

/// `GET /api/test-translation/start`: run one line through the configured
/// provider and stream the outcome
pub async fn test_translation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TestTranslationParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let line = params
        .line
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "Hello, how are you today?".to_string());

    let started = stream::iter(vec![Ok(data_event(&json!({
        "status": "started",
        "line": line,
        "sourceLanguage": params.source_language,
        "targetLanguage": params.target_language,
    })))]);

    let pipeline = state.pipeline.clone();
    let result = stream::once(async move {
        let outcome = pipeline
            .test_translate_line(&line, &params.source_language, &params.target_language)
            .await;

        let payload = match outcome {
            Ok(translation) => json!({ "status": "completed", "translation": translation }),
            Err(e) => json!({ "status": "failed", "error": e.to_string(), "kind": e.kind() }),
        };
        Ok(data_event(&payload))
    });

    Sse::new(started.chain(result))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}
