/*!
 * # translarr - automated subtitle translation for media libraries
 *
 * A daemon that watches media indexed by external movie/show managers,
 * discovers source-language subtitles (sidecar files or embedded container
 * tracks), enqueues translation requests toward the configured target
 * languages, drives them through pluggable translation providers and writes
 * translated sidecars next to the media.
 *
 * ## Architecture
 *
 * The crate is organized in these main modules:
 * - `database`: SQLite persistence for media, the request queue, settings
 *   and audit logs
 * - `subtitles`: SRT/ASS codec and text predicates
 * - `media`: embedded stream probing/extraction, track scoring and the
 *   per-media translation state engine
 * - `providers`: machine-translation and chat-LLM clients behind one trait,
 *   plus the usage-limit gate
 * - `translation`: batching, fallback, deferred repair, integrity checks
 *   and the end-to-end pipeline
 * - `queue`: the request lifecycle service and the in-process event bus
 * - `workers`: the bounded priority-aware worker pool and the dispatcher
 * - `scheduler`: recurring automation, indexing and housekeeping jobs
 * - `server`: the axum operator API with SSE streams
 */

pub mod database;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod media;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod subtitles;
pub mod translation;
pub mod workers;

// Re-export main types for easier usage
pub use database::{DatabaseConnection, MediaKind, Repository, RequestStatus, TranslationState};
pub use errors::{ProviderError, TranslationError};
pub use queue::TranslationRequestService;
pub use settings::SettingsStore;
pub use subtitles::SubtitleDocument;
pub use translation::SubtitlePipeline;
pub use workers::WorkerPool;
