/*!
 * Database layer for persistent state.
 *
 * This module provides SQLite-backed persistence for the media library,
 * the translation request queue, settings and audit logs.
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{DatabaseConnection, DatabaseStats};
pub use models::{
    CleanupLogRecord, EmbeddedSubtitleRecord, MediaKind, MediaRecord, ProviderLogRecord,
    RequestLogRecord, RequestStatus, SeasonRecord, ShowRecord, TranslatableSubtitle,
    TranslationRequestRecord, TranslationState,
};
pub use repository::{Repository, RequestListQuery, RequestPage};
