/*!
 * Settings store and typed snapshots.
 *
 * Configuration lives in the `settings` table as a keyed string store. The
 * `SettingsStore` fronts it with a read-through cache (sliding 30 min,
 * absolute 1 h) and publishes change events to in-process subscribers.
 * Workers take one typed snapshot per request so behavior stays consistent
 * within a single file.
 */

use anyhow::{Context, Result};
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::database::Repository;

/// Sliding cache expiry
const CACHE_SLIDING: Duration = Duration::from_secs(30 * 60);
/// Absolute cache expiry
const CACHE_ABSOLUTE: Duration = Duration::from_secs(60 * 60);

/// Recognized setting keys
pub mod keys {
    // Automation
    pub const AUTOMATION_ENABLED: &str = "automation_enabled";
    pub const TRANSLATION_SCHEDULE: &str = "translation_schedule";
    pub const MAX_TRANSLATIONS_PER_RUN: &str = "max_translations_per_run";
    pub const TRANSLATION_CYCLE: &str = "translation_cycle";
    pub const MOVIE_SCHEDULE: &str = "movie_schedule";
    pub const SHOW_SCHEDULE: &str = "show_schedule";
    pub const MOVIE_AGE_THRESHOLD: &str = "movie_age_threshold";
    pub const SHOW_AGE_THRESHOLD: &str = "show_age_threshold";

    // Translation
    pub const SERVICE_TYPE: &str = "service_type";
    pub const MAX_PARALLEL_TRANSLATIONS: &str = "max_parallel_translations";
    pub const SOURCE_LANGUAGES: &str = "source_languages";
    pub const TARGET_LANGUAGES: &str = "target_languages";
    pub const AI_PROMPT: &str = "ai_prompt";
    pub const AI_MODEL: &str = "ai_model";
    pub const AI_ENDPOINT: &str = "ai_endpoint";
    pub const AI_API_KEY: &str = "ai_api_key";
    pub const MT_ENDPOINT: &str = "mt_endpoint";
    pub const MT_API_KEY: &str = "mt_api_key";
    pub const CUSTOM_AI_PARAMETERS: &str = "custom_ai_parameters";
    pub const AI_CONTEXT_PROMPT_ENABLED: &str = "ai_context_prompt_enabled";
    pub const AI_CONTEXT_PROMPT: &str = "ai_context_prompt";
    pub const AI_CONTEXT_BEFORE: &str = "ai_context_before";
    pub const AI_CONTEXT_AFTER: &str = "ai_context_after";
    pub const FIX_OVERLAPPING_SUBTITLES: &str = "fix_overlapping_subtitles";
    pub const STRIP_SUBTITLE_FORMATTING: &str = "strip_subtitle_formatting";
    pub const ADD_TRANSLATOR_INFO: &str = "add_translator_info";
    pub const USE_BATCH_TRANSLATION: &str = "use_batch_translation";
    pub const MAX_BATCH_SIZE: &str = "max_batch_size";
    pub const USE_SUBTITLE_TAGGING: &str = "use_subtitle_tagging";
    pub const REMOVE_LANGUAGE_TAG: &str = "remove_language_tag";
    pub const SUBTITLE_TAG: &str = "subtitle_tag";
    pub const IGNORE_CAPTIONS: &str = "ignore_captions";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const RETRY_DELAY: &str = "retry_delay";
    pub const RETRY_DELAY_MULTIPLIER: &str = "retry_delay_multiplier";
    pub const ENABLE_BATCH_FALLBACK: &str = "enable_batch_fallback";
    pub const MAX_BATCH_SPLIT_ATTEMPTS: &str = "max_batch_split_attempts";
    pub const STRIP_ASS_DRAWING_COMMANDS: &str = "strip_ass_drawing_commands";
    pub const CLEAN_SOURCE_ASS_DRAWINGS: &str = "clean_source_ass_drawings";
    pub const BATCH_RETRY_MODE: &str = "batch_retry_mode";
    pub const REPAIR_CONTEXT_RADIUS: &str = "repair_context_radius";
    pub const REPAIR_MAX_RETRIES: &str = "repair_max_retries";
    pub const LANGUAGE_SETTINGS_VERSION: &str = "language_settings_version";
    pub const BATCH_CONTEXT_ENABLED: &str = "batch_context_enabled";
    pub const BATCH_CONTEXT_BEFORE: &str = "batch_context_before";
    pub const BATCH_CONTEXT_AFTER: &str = "batch_context_after";

    // Validation
    pub const SUBTITLE_VALIDATION_ENABLED: &str = "subtitle_validation_enabled";
    pub const SUBTITLE_VALIDATION_MIN_RATIO: &str = "subtitle_validation_min_ratio";
    pub const SUBTITLE_INTEGRITY_VALIDATION_ENABLED: &str =
        "subtitle_integrity_validation_enabled";

    // Extraction
    pub const SUBTITLE_EXTRACTION_MODE: &str = "subtitle_extraction_mode";
    pub const PROBE_BINARY: &str = "probe_binary";
    pub const EXTRACT_BINARY: &str = "extract_binary";

    // Usage gate
    pub const PROVIDER_PLAN_REQUESTS_PER_DAY: &str = "provider_plan_requests_per_day";
    pub const PROVIDER_OVERRIDE_REQUESTS_PER_DAY: &str = "provider_override_requests_per_day";
    pub const PROVIDER_REQUEST_BUFFER: &str = "provider_request_buffer";
    pub const PROVIDER_USAGE_DAY: &str = "provider_usage_day";
    pub const PROVIDER_USAGE_COUNT: &str = "provider_usage_count";
    pub const PROVIDER_PAUSE_UNTIL: &str = "provider_pause_until";

    // Housekeeping
    pub const REQUEST_RETENTION_DAYS: &str = "request_retention_days";
}

/// Keys whose change invalidates every computed media state
pub const LANGUAGE_SETTING_KEYS: &[&str] = &[
    keys::SOURCE_LANGUAGES,
    keys::TARGET_LANGUAGES,
    keys::IGNORE_CAPTIONS,
];

/// Default values seeded on first run
pub fn default_settings() -> Vec<(String, String)> {
    let defaults: &[(&str, &str)] = &[
        (keys::AUTOMATION_ENABLED, "false"),
        (keys::TRANSLATION_SCHEDULE, "15m"),
        (keys::MAX_TRANSLATIONS_PER_RUN, "10"),
        (keys::TRANSLATION_CYCLE, "15m"),
        (keys::MOVIE_SCHEDULE, "6h"),
        (keys::SHOW_SCHEDULE, "6h"),
        (keys::MOVIE_AGE_THRESHOLD, "0"),
        (keys::SHOW_AGE_THRESHOLD, "0"),
        (keys::SERVICE_TYPE, "ollama"),
        (keys::MAX_PARALLEL_TRANSLATIONS, "2"),
        (keys::SOURCE_LANGUAGES, "en"),
        (keys::TARGET_LANGUAGES, ""),
        (
            keys::AI_PROMPT,
            "Translate these subtitle lines from {sourceLanguage} to {targetLanguage}. \
             Keep each numbered line on its own line prefixed by its number. \
             Return only the translations.",
        ),
        (keys::AI_MODEL, "llama3.1"),
        (keys::AI_ENDPOINT, "http://localhost:11434"),
        (keys::AI_API_KEY, ""),
        (keys::MT_ENDPOINT, "http://localhost:5000"),
        (keys::MT_API_KEY, ""),
        (keys::CUSTOM_AI_PARAMETERS, "{}"),
        (keys::AI_CONTEXT_PROMPT_ENABLED, "false"),
        (
            keys::AI_CONTEXT_PROMPT,
            "Surrounding lines are provided for context only; translate only the numbered lines.",
        ),
        (keys::AI_CONTEXT_BEFORE, "2"),
        (keys::AI_CONTEXT_AFTER, "2"),
        (keys::FIX_OVERLAPPING_SUBTITLES, "false"),
        (keys::STRIP_SUBTITLE_FORMATTING, "false"),
        (keys::ADD_TRANSLATOR_INFO, "false"),
        (keys::USE_BATCH_TRANSLATION, "true"),
        (keys::MAX_BATCH_SIZE, "50"),
        (keys::USE_SUBTITLE_TAGGING, "true"),
        (keys::REMOVE_LANGUAGE_TAG, "false"),
        (keys::SUBTITLE_TAG, "translarr"),
        (keys::IGNORE_CAPTIONS, "false"),
        (keys::REQUEST_TIMEOUT, "120"),
        (keys::MAX_RETRIES, "3"),
        (keys::RETRY_DELAY, "5"),
        (keys::RETRY_DELAY_MULTIPLIER, "2"),
        (keys::ENABLE_BATCH_FALLBACK, "true"),
        (keys::MAX_BATCH_SPLIT_ATTEMPTS, "3"),
        (keys::STRIP_ASS_DRAWING_COMMANDS, "true"),
        (keys::CLEAN_SOURCE_ASS_DRAWINGS, "false"),
        (keys::BATCH_RETRY_MODE, "deferred"),
        (keys::REPAIR_CONTEXT_RADIUS, "2"),
        (keys::REPAIR_MAX_RETRIES, "2"),
        (keys::LANGUAGE_SETTINGS_VERSION, "1"),
        (keys::BATCH_CONTEXT_ENABLED, "true"),
        (keys::BATCH_CONTEXT_BEFORE, "2"),
        (keys::BATCH_CONTEXT_AFTER, "2"),
        (keys::SUBTITLE_VALIDATION_ENABLED, "true"),
        (keys::SUBTITLE_VALIDATION_MIN_RATIO, "0.5"),
        (keys::SUBTITLE_INTEGRITY_VALIDATION_ENABLED, "true"),
        (keys::SUBTITLE_EXTRACTION_MODE, "on_demand"),
        (keys::PROBE_BINARY, "ffprobe"),
        (keys::EXTRACT_BINARY, "ffmpeg"),
        (keys::PROVIDER_PLAN_REQUESTS_PER_DAY, "0"),
        (keys::PROVIDER_OVERRIDE_REQUESTS_PER_DAY, ""),
        (keys::PROVIDER_REQUEST_BUFFER, "0"),
        (keys::REQUEST_RETENTION_DAYS, "30"),
    ];

    defaults
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Batch retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRetryMode {
    /// Rely solely on per-batch fallback
    Immediate,
    /// Collect failures and repair once per file at the end
    Deferred,
}

/// Embedded subtitle extraction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Extract when a request needs the track
    OnDemand,
    /// Extract tracks matching configured source languages ahead of time
    SpecificLanguage,
    /// Extract everything (background sweep only)
    ExtractAll,
}

/// A change published to settings subscribers
#[derive(Debug, Clone)]
pub struct SettingChange {
    /// Changed key
    pub key: String,
    /// New value
    pub value: String,
}

/// Typed per-request snapshot of translation behavior
#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub service_type: String,
    pub source_languages: Vec<String>,
    pub target_languages: Vec<String>,
    pub ai_prompt: String,
    pub ai_model: String,
    pub ai_endpoint: String,
    pub ai_api_key: String,
    pub mt_endpoint: String,
    pub mt_api_key: String,
    pub custom_ai_parameters: HashMap<String, serde_json::Value>,
    pub ai_context_prompt_enabled: bool,
    pub ai_context_prompt: String,
    pub fix_overlapping_subtitles: bool,
    pub strip_subtitle_formatting: bool,
    pub add_translator_info: bool,
    pub use_batch_translation: bool,
    pub max_batch_size: usize,
    pub use_subtitle_tagging: bool,
    pub subtitle_tag: String,
    pub remove_language_tag: bool,
    pub ignore_captions: bool,
    pub request_timeout_minutes: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retry_delay_multiplier: f64,
    pub enable_batch_fallback: bool,
    pub max_batch_split_attempts: usize,
    pub strip_ass_drawing_commands: bool,
    pub clean_source_ass_drawings: bool,
    pub batch_retry_mode: BatchRetryMode,
    pub repair_context_radius: usize,
    pub repair_max_retries: usize,
    pub batch_context_enabled: bool,
    pub batch_context_before: usize,
    pub batch_context_after: usize,
    pub validation_enabled: bool,
    pub validation_min_ratio: f64,
    pub integrity_validation_enabled: bool,
    pub extraction_mode: ExtractionMode,
    pub probe_binary: String,
    pub extract_binary: String,
    pub language_settings_version: i64,
}

impl TranslationSettings {
    /// Sidecar tag applied to output files, when tagging is on
    pub fn output_tag(&self) -> Option<&str> {
        if self.use_subtitle_tagging && !self.subtitle_tag.is_empty() {
            Some(self.subtitle_tag.as_str())
        } else {
            None
        }
    }
}

/// Typed snapshot of automation behavior
#[derive(Debug, Clone)]
pub struct AutomationSettings {
    pub enabled: bool,
    pub translation_schedule: String,
    pub max_translations_per_run: i64,
    pub movie_schedule: String,
    pub show_schedule: String,
    pub movie_age_threshold_hours: i64,
    pub show_age_threshold_hours: i64,
    pub request_retention_days: i64,
}

struct CacheState {
    values: HashMap<String, String>,
    loaded_at: Instant,
    last_access: Instant,
}

/// Read-through cached settings store with change notifications
#[derive(Clone)]
pub struct SettingsStore {
    repo: Repository,
    cache: std::sync::Arc<Mutex<Option<CacheState>>>,
    events: broadcast::Sender<SettingChange>,
}

impl SettingsStore {
    /// Create a store over the repository
    pub fn new(repo: Repository) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            repo,
            cache: std::sync::Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Seed defaults for missing keys; call once at startup
    pub async fn seed_defaults(&self) -> Result<usize> {
        self.repo.seed_default_settings(default_settings()).await
    }

    /// Subscribe to setting changes
    pub fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.events.subscribe()
    }

    fn cached_value(&self, key: &str) -> Option<Option<String>> {
        let mut guard = self.cache.lock();
        let now = Instant::now();

        let expired = match guard.as_ref() {
            Some(state) => {
                now.duration_since(state.loaded_at) > CACHE_ABSOLUTE
                    || now.duration_since(state.last_access) > CACHE_SLIDING
            }
            None => return None,
        };
        if expired {
            *guard = None;
            return None;
        }

        let state = guard.as_mut()?;
        state.last_access = now;
        Some(state.values.get(key).cloned())
    }

    async fn reload_cache(&self) -> Result<HashMap<String, String>> {
        let values = self.repo.get_all_settings().await?;
        let now = Instant::now();
        *self.cache.lock() = Some(CacheState {
            values: values.clone(),
            loaded_at: now,
            last_access: now,
        });
        Ok(values)
    }

    /// Get a raw setting value through the cache
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cached_value(key) {
            return Ok(hit);
        }
        let values = self.reload_cache().await?;
        Ok(values.get(key).cloned())
    }

    /// Get a value or a default when unset/empty
    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get(key)
            .await?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Write a setting, invalidate the cache and notify subscribers
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repo.set_setting(key, value).await?;
        *self.cache.lock() = None;
        let _ = self.events.send(SettingChange {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// All settings (uncached read, used by the operator API)
    pub async fn all(&self) -> Result<HashMap<String, String>> {
        self.repo.get_all_settings().await
    }

    async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let value = self.get_or(key, if default { "true" } else { "false" }).await?;
        Ok(matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"))
    }

    async fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        let value = self.get_or(key, &default.to_string()).await?;
        value
            .parse()
            .with_context(|| format!("Setting {} is not an integer: {:?}", key, value))
    }

    async fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        let value = self.get_or(key, &default.to_string()).await?;
        value
            .parse()
            .with_context(|| format!("Setting {} is not a number: {:?}", key, value))
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        let value = self.get(key).await?.unwrap_or_default();
        Ok(value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Current language settings version
    pub async fn language_settings_version(&self) -> Result<i64> {
        self.get_i64(keys::LANGUAGE_SETTINGS_VERSION, 1).await
    }

    /// Increment the language settings version, returning the new value.
    /// Called when a language-affecting key changes.
    pub async fn bump_language_settings_version(&self) -> Result<i64> {
        let next = self.language_settings_version().await? + 1;
        self.set(keys::LANGUAGE_SETTINGS_VERSION, &next.to_string())
            .await?;
        Ok(next)
    }

    /// Build the per-request translation snapshot
    pub async fn translation_settings(&self) -> Result<TranslationSettings> {
        let custom_parameters_raw = self.get_or(keys::CUSTOM_AI_PARAMETERS, "{}").await?;
        let custom_ai_parameters: HashMap<String, serde_json::Value> =
            serde_json::from_str(&custom_parameters_raw).unwrap_or_else(|e| {
                warn!("Ignoring unparseable {}: {}", keys::CUSTOM_AI_PARAMETERS, e);
                HashMap::new()
            });

        let batch_retry_mode = match self.get_or(keys::BATCH_RETRY_MODE, "deferred").await?.as_str()
        {
            "immediate" => BatchRetryMode::Immediate,
            _ => BatchRetryMode::Deferred,
        };

        let extraction_mode = match self
            .get_or(keys::SUBTITLE_EXTRACTION_MODE, "on_demand")
            .await?
            .as_str()
        {
            "specific_language" => ExtractionMode::SpecificLanguage,
            "extract_all" => ExtractionMode::ExtractAll,
            _ => ExtractionMode::OnDemand,
        };

        Ok(TranslationSettings {
            service_type: self.get_or(keys::SERVICE_TYPE, "ollama").await?,
            source_languages: self.get_list(keys::SOURCE_LANGUAGES).await?,
            target_languages: self.get_list(keys::TARGET_LANGUAGES).await?,
            ai_prompt: self.get_or(keys::AI_PROMPT, "").await?,
            ai_model: self.get_or(keys::AI_MODEL, "").await?,
            ai_endpoint: self.get_or(keys::AI_ENDPOINT, "").await?,
            ai_api_key: self.get(keys::AI_API_KEY).await?.unwrap_or_default(),
            mt_endpoint: self.get_or(keys::MT_ENDPOINT, "").await?,
            mt_api_key: self.get(keys::MT_API_KEY).await?.unwrap_or_default(),
            custom_ai_parameters,
            ai_context_prompt_enabled: self
                .get_bool(keys::AI_CONTEXT_PROMPT_ENABLED, false)
                .await?,
            ai_context_prompt: self.get_or(keys::AI_CONTEXT_PROMPT, "").await?,
            fix_overlapping_subtitles: self
                .get_bool(keys::FIX_OVERLAPPING_SUBTITLES, false)
                .await?,
            strip_subtitle_formatting: self
                .get_bool(keys::STRIP_SUBTITLE_FORMATTING, false)
                .await?,
            add_translator_info: self.get_bool(keys::ADD_TRANSLATOR_INFO, false).await?,
            use_batch_translation: self.get_bool(keys::USE_BATCH_TRANSLATION, true).await?,
            max_batch_size: self.get_i64(keys::MAX_BATCH_SIZE, 50).await?.max(1) as usize,
            use_subtitle_tagging: self.get_bool(keys::USE_SUBTITLE_TAGGING, true).await?,
            subtitle_tag: self.get_or(keys::SUBTITLE_TAG, "translarr").await?,
            remove_language_tag: self.get_bool(keys::REMOVE_LANGUAGE_TAG, false).await?,
            ignore_captions: self.get_bool(keys::IGNORE_CAPTIONS, false).await?,
            request_timeout_minutes: self.get_i64(keys::REQUEST_TIMEOUT, 120).await?.max(1) as u64,
            max_retries: self.get_i64(keys::MAX_RETRIES, 3).await?.max(0) as u32,
            retry_delay_secs: self.get_i64(keys::RETRY_DELAY, 5).await?.max(0) as u64,
            retry_delay_multiplier: self.get_f64(keys::RETRY_DELAY_MULTIPLIER, 2.0).await?,
            enable_batch_fallback: self.get_bool(keys::ENABLE_BATCH_FALLBACK, true).await?,
            max_batch_split_attempts: self.get_i64(keys::MAX_BATCH_SPLIT_ATTEMPTS, 3).await?.max(1)
                as usize,
            strip_ass_drawing_commands: self
                .get_bool(keys::STRIP_ASS_DRAWING_COMMANDS, true)
                .await?,
            clean_source_ass_drawings: self
                .get_bool(keys::CLEAN_SOURCE_ASS_DRAWINGS, false)
                .await?,
            batch_retry_mode,
            repair_context_radius: self.get_i64(keys::REPAIR_CONTEXT_RADIUS, 2).await?.max(0)
                as usize,
            repair_max_retries: self.get_i64(keys::REPAIR_MAX_RETRIES, 2).await?.max(0) as usize,
            batch_context_enabled: self.get_bool(keys::BATCH_CONTEXT_ENABLED, true).await?,
            batch_context_before: self.get_i64(keys::BATCH_CONTEXT_BEFORE, 2).await?.max(0)
                as usize,
            batch_context_after: self.get_i64(keys::BATCH_CONTEXT_AFTER, 2).await?.max(0) as usize,
            validation_enabled: self.get_bool(keys::SUBTITLE_VALIDATION_ENABLED, true).await?,
            validation_min_ratio: self.get_f64(keys::SUBTITLE_VALIDATION_MIN_RATIO, 0.5).await?,
            integrity_validation_enabled: self
                .get_bool(keys::SUBTITLE_INTEGRITY_VALIDATION_ENABLED, true)
                .await?,
            extraction_mode,
            probe_binary: self.get_or(keys::PROBE_BINARY, "ffprobe").await?,
            extract_binary: self.get_or(keys::EXTRACT_BINARY, "ffmpeg").await?,
            language_settings_version: self.language_settings_version().await?,
        })
    }

    /// Build the automation snapshot used by the scheduler
    pub async fn automation_settings(&self) -> Result<AutomationSettings> {
        Ok(AutomationSettings {
            enabled: self.get_bool(keys::AUTOMATION_ENABLED, false).await?,
            translation_schedule: self.get_or(keys::TRANSLATION_SCHEDULE, "15m").await?,
            max_translations_per_run: self.get_i64(keys::MAX_TRANSLATIONS_PER_RUN, 10).await?,
            movie_schedule: self.get_or(keys::MOVIE_SCHEDULE, "6h").await?,
            show_schedule: self.get_or(keys::SHOW_SCHEDULE, "6h").await?,
            movie_age_threshold_hours: self.get_i64(keys::MOVIE_AGE_THRESHOLD, 0).await?,
            show_age_threshold_hours: self.get_i64(keys::SHOW_AGE_THRESHOLD, 0).await?,
            request_retention_days: self.get_i64(keys::REQUEST_RETENTION_DAYS, 30).await?,
        })
    }

    /// Worker pool size, clamped to [1, 20]
    pub async fn max_workers(&self) -> Result<usize> {
        let configured = self.get_i64(keys::MAX_PARALLEL_TRANSLATIONS, 2).await?;
        Ok(configured.clamp(1, 20) as usize)
    }
}
