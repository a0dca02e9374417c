/*!
 * Media state engine.
 *
 * Computes the per-media `TranslationState` against the current language
 * settings and keeps it version-tagged so a settings change lazily
 * invalidates every computed state. This module is the only writer of the
 * media `translation_state` fields.
 */

use anyhow::Result;
use log::{debug, info};

use crate::database::{MediaKind, MediaRecord, Repository, TranslationState};
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::media::scoring;
use crate::settings::{SettingsStore, LANGUAGE_SETTING_KEYS};

/// State computation and staleness tracking for media items
#[derive(Clone)]
pub struct MediaStateEngine {
    repo: Repository,
    settings: SettingsStore,
}

impl MediaStateEngine {
    /// Create the engine
    pub fn new(repo: Repository, settings: SettingsStore) -> Self {
        Self { repo, settings }
    }

    /// Compute the state of a media item without persisting it
    pub async fn evaluate(&self, media: &MediaRecord) -> Result<TranslationState> {
        let settings = self.settings.translation_settings().await?;

        if media.exclude_from_translation || settings.source_languages.is_empty() {
            return Ok(TranslationState::NotApplicable);
        }

        let container = media.container_path();
        let sidecars = FileManager::find_sidecars(&container, settings.output_tag())?;

        let has_source_sidecar = settings.source_languages.iter().any(|configured| {
            sidecars
                .iter()
                .any(|s| language_utils::language_codes_match(&s.language, configured))
        });

        if !has_source_sidecar {
            let embedded = self.repo.get_embedded_subtitles(media.id).await?;
            let suitable = scoring::select_best_track(
                &embedded,
                &settings.source_languages,
                settings.ignore_captions,
            );

            if suitable.is_none() {
                let any_text_based = embedded.iter().any(|t| t.is_text_based);
                return Ok(if any_text_based {
                    TranslationState::AwaitingSource
                } else {
                    TranslationState::NoSuitableSubtitles
                });
            }
        }

        if self
            .repo
            .has_active_request_for_media(media.id, media.kind)
            .await?
        {
            return Ok(TranslationState::InProgress);
        }

        let all_targets_satisfied = !settings.target_languages.is_empty()
            && settings.target_languages.iter().all(|target| {
                sidecars
                    .iter()
                    .any(|s| language_utils::language_codes_match(&s.language, target))
            });

        if all_targets_satisfied {
            Ok(TranslationState::Complete)
        } else {
            Ok(TranslationState::Pending)
        }
    }

    /// Compute and persist the state of a media item, stamping the settings
    /// version and the sidecar inspection time
    pub async fn refresh(&self, media: &MediaRecord) -> Result<TranslationState> {
        let state = self.evaluate(media).await?;
        let version = self.settings.language_settings_version().await?;

        self.repo.update_media_state(media.id, state, version).await?;
        self.repo
            .set_media_last_subtitle_check(media.id, chrono::Utc::now().to_rfc3339())
            .await?;

        debug!("Media {} ({}) -> {}", media.id, media.title, state);
        Ok(state)
    }

    /// Re-evaluate after a request finished successfully: Complete when all
    /// targets are now satisfied, Pending otherwise
    pub async fn on_request_completed(&self, media_id: i64, kind: MediaKind) -> Result<()> {
        if let Some(media) = self.repo.get_media_by_kind(kind, media_id).await? {
            self.refresh(&media).await?;
        }
        Ok(())
    }

    /// Record a terminal failure on the media item
    pub async fn on_request_failed(&self, media_id: i64, kind: MediaKind) -> Result<()> {
        if self.repo.get_media_by_kind(kind, media_id).await?.is_some() {
            let version = self.settings.language_settings_version().await?;
            self.repo
                .update_media_state(media_id, TranslationState::Failed, version)
                .await?;
        }
        Ok(())
    }

    /// Invalidate every computed state. Bumps the language settings version
    /// so lazily re-evaluated items see the new configuration.
    pub async fn mark_all_stale(&self) -> Result<usize> {
        let version = self.settings.bump_language_settings_version().await?;
        let count = self.repo.mark_all_media_stale().await?;
        info!(
            "Marked {} media items stale (language settings v{})",
            count, version
        );
        Ok(count)
    }

    /// React to a settings change: language-affecting keys flush all states.
    /// Returns whether a flush happened. The currently running request, if
    /// any, is never preempted.
    pub async fn on_setting_changed(&self, key: &str) -> Result<bool> {
        if LANGUAGE_SETTING_KEYS.contains(&key) {
            self.mark_all_stale().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Media eligible for automation, honoring per-kind age thresholds
    pub async fn media_needing_translation(
        &self,
        limit: i64,
        priority_first: bool,
    ) -> Result<Vec<MediaRecord>> {
        let automation = self.settings.automation_settings().await?;
        self.repo
            .get_media_needing_translation(
                limit,
                priority_first,
                automation.movie_age_threshold_hours,
                automation.show_age_threshold_hours,
            )
            .await
    }
}
