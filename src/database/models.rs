/*!
 * Database entity models and DTOs.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind discriminator for indexed media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A movie managed by the movie indexer
    Movie,
    /// A show episode managed by the show indexer
    Episode,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Movie => write!(f, "movie"),
            MediaKind::Episode => write!(f, "episode"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "episode" => Ok(MediaKind::Episode),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// Per-media translation state, recomputed against the language settings
/// version it was derived under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationState {
    /// Never evaluated
    Unknown,
    /// Excluded, or source language not configured
    NotApplicable,
    /// Eligible, waiting for a translation pass
    Pending,
    /// An active request exists for this media
    InProgress,
    /// Sidecars exist for every configured target language
    Complete,
    /// Language settings changed since the state was computed
    Stale,
    /// No sidecar and no usable embedded track
    NoSuitableSubtitles,
    /// The last translation attempt failed terminally
    Failed,
    /// A text-based embedded track exists but has not been extracted yet
    AwaitingSource,
}

impl TranslationState {
    /// States that automation re-evaluates on its next pass
    pub fn needs_evaluation(&self) -> bool {
        matches!(
            self,
            TranslationState::Unknown | TranslationState::Stale | TranslationState::Pending
        )
    }
}

impl fmt::Display for TranslationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TranslationState::Unknown => "unknown",
            TranslationState::NotApplicable => "not_applicable",
            TranslationState::Pending => "pending",
            TranslationState::InProgress => "in_progress",
            TranslationState::Complete => "complete",
            TranslationState::Stale => "stale",
            TranslationState::NoSuitableSubtitles => "no_suitable_subtitles",
            TranslationState::Failed => "failed",
            TranslationState::AwaitingSource => "awaiting_source",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TranslationState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(TranslationState::Unknown),
            "not_applicable" => Ok(TranslationState::NotApplicable),
            "pending" => Ok(TranslationState::Pending),
            "in_progress" => Ok(TranslationState::InProgress),
            "complete" => Ok(TranslationState::Complete),
            "stale" => Ok(TranslationState::Stale),
            "no_suitable_subtitles" => Ok(TranslationState::NoSuitableSubtitles),
            "failed" => Ok(TranslationState::Failed),
            "awaiting_source" => Ok(TranslationState::AwaitingSource),
            _ => Err(anyhow::anyhow!("Invalid translation state: {}", s)),
        }
    }
}

/// Status of a queued translation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Queued, waiting for a worker slot
    Pending,
    /// A worker is executing the request
    InProgress,
    /// Finished and the target file was written
    Completed,
    /// Cancelled by the operator
    Cancelled,
    /// Terminal failure
    Failed,
    /// The process died while the request was running
    Interrupted,
}

impl RequestStatus {
    /// A request is active while it occupies the queue or a worker
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::InProgress)
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Failed => "failed",
            RequestStatus::Interrupted => "interrupted",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "failed" => Ok(RequestStatus::Failed),
            "interrupted" => Ok(RequestStatus::Interrupted),
            _ => Err(anyhow::anyhow!("Invalid request status: {}", s)),
        }
    }
}

/// Indexed media item (movie or episode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Database ID
    pub id: i64,
    /// Identifier assigned by the external media manager
    pub external_id: i64,
    /// Movie or episode
    pub kind: MediaKind,
    /// Owning season for episodes, NULL for movies
    pub season_id: Option<i64>,
    /// Display title
    pub title: String,
    /// Directory containing the media container
    pub path: String,
    /// Container file name
    pub file_name: String,
    /// When the media manager added the item (RFC 3339)
    pub date_added: String,
    /// Operator opt-out from translation
    pub exclude_from_translation: bool,
    /// Operator priority flag
    pub is_priority: bool,
    /// When priority was toggled on (RFC 3339)
    pub priority_date: Option<String>,
    /// Per-item minimum age (hours) before automation considers it;
    /// NULL falls back to the per-kind setting
    pub translation_age_threshold: Option<i64>,
    /// Current computed state
    pub translation_state: TranslationState,
    /// When embedded tracks were last probed (RFC 3339)
    pub indexed_at: Option<String>,
    /// Language settings version the state was computed under
    pub state_settings_version: i64,
    /// Last sidecar directory inspection (RFC 3339)
    pub last_subtitle_check_at: Option<String>,
}

impl MediaRecord {
    /// Full path to the media container file
    pub fn container_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.path).join(&self.file_name)
    }
}

/// One subtitle stream found inside a media container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedSubtitleRecord {
    /// Database ID
    pub id: i64,
    /// Owning media row
    pub media_id: i64,
    /// Stream index as reported by the probe subprocess
    pub stream_index: i64,
    /// ISO 639-2 language code, if tagged
    pub language: Option<String>,
    /// Track title, if tagged
    pub title: Option<String>,
    /// Codec name as reported by the probe
    pub codec_name: String,
    /// Whether the codec is a known text-based format
    pub is_text_based: bool,
    /// Container default-track flag
    pub is_default: bool,
    /// Container forced-track flag
    pub is_forced: bool,
    /// Whether this stream was extracted to a sidecar
    pub is_extracted: bool,
    /// Path of the extracted sidecar, once extracted
    pub extracted_path: Option<String>,
}

/// Persistent translation queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequestRecord {
    /// Database ID
    pub id: i64,
    /// Media row the request targets
    pub media_id: i64,
    /// Movie or episode
    pub media_kind: MediaKind,
    /// Media title snapshot for display
    pub title: String,
    /// Source language (ISO 639)
    pub source_language: String,
    /// Target language (ISO 639)
    pub target_language: String,
    /// Sidecar to translate; NULL when extraction must happen first
    pub subtitle_to_translate: Option<String>,
    /// Queue status
    pub status: RequestStatus,
    /// Completion percentage, 0..=100, monotonic
    pub progress: i64,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Completion timestamp (RFC 3339)
    pub completed_at: Option<String>,
    /// Worker-assigned job id
    pub job_id: Option<String>,
    /// Uniqueness sentinel: Some(true) while active, NULL once terminal
    pub is_active: Option<bool>,
}

impl TranslationRequestRecord {
    /// Tuple identifying the logical translation this request performs
    pub fn dedupe_key(&self) -> (i64, MediaKind, &str, &str) {
        (
            self.media_id,
            self.media_kind,
            self.source_language.as_str(),
            self.target_language.as_str(),
        )
    }
}

/// Input for creating a translation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatableSubtitle {
    /// Media row to translate for
    pub media_id: i64,
    /// Movie or episode
    pub media_kind: MediaKind,
    /// Media title snapshot
    pub title: String,
    /// Source language
    pub source_language: String,
    /// Target language
    pub target_language: String,
    /// Known sidecar path, or None when the pipeline must extract first
    pub subtitle_path: Option<String>,
}

/// Append-only audit entry attached to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRecord {
    /// Database ID
    pub id: i64,
    /// Owning request
    pub request_id: i64,
    /// Log level (info, warn, error)
    pub level: String,
    /// Human-readable message
    pub message: String,
    /// Raw detail payload (provider bodies, stderr), if any
    pub details: Option<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

/// Show record (episodes hang off seasons which hang off shows)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowRecord {
    /// Database ID
    pub id: i64,
    /// Identifier assigned by the show indexer
    pub external_id: i64,
    /// Show title
    pub title: String,
    /// Root path of the show
    pub path: String,
    /// When the show was added (RFC 3339)
    pub date_added: String,
}

/// Season record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonRecord {
    /// Database ID
    pub id: i64,
    /// Owning show
    pub show_id: i64,
    /// Season number
    pub number: i64,
}

/// Audit entry for a deleted orphan sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupLogRecord {
    /// Database ID
    pub id: i64,
    /// Path that was removed
    pub file_path: String,
    /// Why it was considered orphaned
    pub reason: String,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

/// Audit entry for provider usage/limit events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLogRecord {
    /// Database ID
    pub id: i64,
    /// Provider name
    pub provider: String,
    /// Event kind (limit_reached, payment_required, reset)
    pub event: String,
    /// Free-form detail
    pub details: Option<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requestStatus_isActive_shouldCoverQueueAndWorker() {
        assert!(RequestStatus::Pending.is_active());
        assert!(RequestStatus::InProgress.is_active());
        assert!(!RequestStatus::Completed.is_active());
        assert!(!RequestStatus::Cancelled.is_active());
        assert!(!RequestStatus::Failed.is_active());
        assert!(!RequestStatus::Interrupted.is_active());
    }

    #[test]
    fn test_requestStatus_roundTrip_shouldParseDisplayOutput() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::InProgress,
            RequestStatus::Completed,
            RequestStatus::Cancelled,
            RequestStatus::Failed,
            RequestStatus::Interrupted,
        ] {
            let parsed: RequestStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_translationState_roundTrip_shouldParseDisplayOutput() {
        for state in [
            TranslationState::Unknown,
            TranslationState::NotApplicable,
            TranslationState::Pending,
            TranslationState::InProgress,
            TranslationState::Complete,
            TranslationState::Stale,
            TranslationState::NoSuitableSubtitles,
            TranslationState::Failed,
            TranslationState::AwaitingSource,
        ] {
            let parsed: TranslationState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn test_translationState_needsEvaluation_shouldFlagLazyStates() {
        assert!(TranslationState::Unknown.needs_evaluation());
        assert!(TranslationState::Stale.needs_evaluation());
        assert!(TranslationState::Pending.needs_evaluation());
        assert!(!TranslationState::Complete.needs_evaluation());
        assert!(!TranslationState::InProgress.needs_evaluation());
    }

    #[test]
    fn test_mediaKind_fromStr_shouldRejectUnknown() {
        assert!("movie".parse::<MediaKind>().is_ok());
        assert!("episode".parse::<MediaKind>().is_ok());
        assert!("song".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_mediaRecord_containerPath_shouldJoinPathAndFile() {
        let media = MediaRecord {
            id: 1,
            external_id: 7,
            kind: MediaKind::Movie,
            season_id: None,
            title: "Example".into(),
            path: "/library/movies/Example".into(),
            file_name: "Example.mkv".into(),
            date_added: "2026-01-01T00:00:00Z".into(),
            exclude_from_translation: false,
            is_priority: false,
            priority_date: None,
            translation_age_threshold: None,
            translation_state: TranslationState::Unknown,
            indexed_at: None,
            state_settings_version: 0,
            last_subtitle_check_at: None,
        };
        assert_eq!(
            media.container_path(),
            std::path::PathBuf::from("/library/movies/Example/Example.mkv")
        );
    }
}
