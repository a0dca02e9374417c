/*!
 * Recurring background jobs.
 *
 * Interval schedules are parsed from settings (`15m`, `6h`, `1d`, or plain
 * minutes). The scheduler runs on the utility side of the process: it never
 * touches the translation slot pool, it only asks the state engine for
 * eligible media and hands requests to the service.
 */

use anyhow::Result;
use log::{error, info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::database::{MediaRecord, Repository, TranslatableSubtitle, TranslationState};
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::media::{MediaIndexer, MediaStateEngine, SubtitleProber};
use crate::queue::TranslationRequestService;
use crate::settings::{ExtractionMode, SettingsStore};
use crate::translation::integrity::{self, IntegrityConfig};

/// Fallback interval when a schedule setting cannot be parsed
const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Interval for the housekeeping jobs (integrity sweep, orphan cleanup,
/// request retention)
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse an interval expression: `90s`, `15m`, `6h`, `1d`, or a bare number
/// of minutes
pub fn parse_schedule(expression: &str) -> Option<Duration> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(minutes) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(minutes * 60));
    }

    let (value, unit) = trimmed.split_at(trimmed.len() - 1);
    let value: u64 = value.trim().parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        "d" => Some(Duration::from_secs(value * 86_400)),
        _ => None,
    }
}

/// Background job scheduler
pub struct Scheduler {
    repo: Repository,
    settings: SettingsStore,
    state_engine: MediaStateEngine,
    service: TranslationRequestService,
    indexer: Arc<dyn MediaIndexer>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create the scheduler
    pub fn new(
        repo: Repository,
        settings: SettingsStore,
        state_engine: MediaStateEngine,
        service: TranslationRequestService,
        indexer: Arc<dyn MediaIndexer>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            settings,
            state_engine,
            service,
            indexer,
            shutdown,
        })
    }

    /// Spawn all recurring jobs
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.clone().spawn_loop("translation sweep", |s| async move {
                s.translation_sweep().await
            }),
            self.clone().spawn_loop("movie index", |s| async move {
                let count = s.indexer.index_movies(&s.repo).await?;
                if count > 0 {
                    info!("Indexed {} movies", count);
                }
                Ok(())
            }),
            self.clone().spawn_loop("show index", |s| async move {
                let count = s.indexer.index_shows(&s.repo).await?;
                if count > 0 {
                    info!("Indexed {} episodes", count);
                }
                Ok(())
            }),
            self.clone()
                .spawn_loop("housekeeping", |s| async move { s.housekeeping().await }),
        ]
    }

    fn spawn_loop<F, Fut>(
        self: Arc<Self>,
        name: &'static str,
        job: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        tokio::spawn(async move {
            info!("Scheduler job '{}' started", name);
            loop {
                let interval = self.interval_for(name).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.shutdown.cancelled() => break,
                }

                if let Err(e) = job(self.clone()).await {
                    error!("Scheduler job '{}' failed: {}", name, e);
                }
            }
            info!("Scheduler job '{}' stopped", name);
        })
    }

    /// Interval of a job, re-read every cycle so setting changes apply
    async fn interval_for(&self, name: &str) -> Duration {
        let automation = match self.settings.automation_settings().await {
            Ok(a) => a,
            Err(_) => return DEFAULT_INTERVAL,
        };
        match name {
            "translation sweep" => {
                parse_schedule(&automation.translation_schedule).unwrap_or(DEFAULT_INTERVAL)
            }
            "movie index" => parse_schedule(&automation.movie_schedule).unwrap_or(DEFAULT_INTERVAL),
            "show index" => parse_schedule(&automation.show_schedule).unwrap_or(DEFAULT_INTERVAL),
            _ => HOUSEKEEPING_INTERVAL,
        }
    }

    /// Automated translation sweep: re-evaluate eligible media and enqueue
    /// requests for the missing target languages
    pub async fn translation_sweep(&self) -> Result<()> {
        let automation = self.settings.automation_settings().await?;
        if !automation.enabled {
            return Ok(());
        }

        let eligible = self
            .state_engine
            .media_needing_translation(automation.max_translations_per_run, true)
            .await?;
        if eligible.is_empty() {
            return Ok(());
        }

        info!("Translation sweep: {} eligible media items", eligible.len());

        // Ahead-of-time extraction policies run before states are decided
        let settings = self.settings.translation_settings().await?;
        if settings.extraction_mode != ExtractionMode::OnDemand {
            if let Err(e) = self.extraction_sweep(&eligible).await {
                warn!("Extraction sweep failed: {}", e);
            }
        }

        for media in eligible {
            let state = self.state_engine.refresh(&media).await?;
            if state != TranslationState::Pending {
                continue;
            }
            if let Err(e) = self.enqueue_for_media(&media).await {
                warn!("Failed to enqueue {:?}: {}", media.title, e);
            }
        }

        Ok(())
    }

    /// Extract embedded tracks ahead of translation. `specific_language`
    /// extracts the best track per configured source language;
    /// `extract_all` extracts every text-based stream.
    async fn extraction_sweep(&self, media_batch: &[MediaRecord]) -> Result<usize> {
        let settings = self.settings.translation_settings().await?;
        let prober = SubtitleProber::new(
            self.repo.clone(),
            settings.probe_binary.clone(),
            settings.extract_binary.clone(),
        );
        let token = CancellationToken::new();

        let mut extracted = 0;
        for media in media_batch {
            let container = media.container_path();
            let sidecars = FileManager::find_sidecars(&container, settings.output_tag())?;
            let has_source = settings.source_languages.iter().any(|configured| {
                sidecars
                    .iter()
                    .any(|s| language_utils::language_codes_match(&s.language, configured))
            });
            if has_source {
                continue;
            }

            let streams = match prober.probe_media_cached(media, &token).await {
                Ok(streams) => streams,
                Err(e) => {
                    warn!("Probe of {:?} failed: {}", media.file_name, e);
                    continue;
                }
            };

            let targets: Vec<_> = match settings.extraction_mode {
                ExtractionMode::SpecificLanguage => crate::media::scoring::select_best_track(
                    &streams,
                    &settings.source_languages,
                    settings.ignore_captions,
                )
                .map(|(_, track)| track.clone())
                .into_iter()
                .collect(),
                ExtractionMode::ExtractAll => streams
                    .iter()
                    .filter(|s| s.is_text_based)
                    .cloned()
                    .collect(),
                ExtractionMode::OnDemand => Vec::new(),
            };

            for stream in targets.iter().filter(|s| !s.is_extracted) {
                match prober.extract_stream(media, stream, &token).await {
                    Ok(_) => extracted += 1,
                    Err(e) => warn!(
                        "Extraction of stream {} from {:?} failed: {}",
                        stream.stream_index, media.file_name, e
                    ),
                }
            }
        }

        if extracted > 0 {
            info!("Extraction sweep produced {} sidecars", extracted);
        }
        Ok(extracted)
    }

    /// Create one request per missing target language for a media item
    pub async fn enqueue_for_media(&self, media: &MediaRecord) -> Result<usize> {
        let settings = self.settings.translation_settings().await?;
        let container = media.container_path();
        let sidecars = FileManager::find_sidecars(&container, settings.output_tag())?;

        // Prefer a source language that already has a sidecar; fall back to
        // the first configured language, letting the pipeline extract
        let source_sidecar = settings.source_languages.iter().find_map(|configured| {
            sidecars
                .iter()
                .find(|s| language_utils::language_codes_match(&s.language, configured))
                .map(|s| (configured.clone(), s.path.clone()))
        });
        let (source_language, subtitle_path) = match source_sidecar {
            Some((language, path)) => (language, Some(path.to_string_lossy().to_string())),
            None => {
                let Some(first) = settings.source_languages.first() else {
                    return Ok(0);
                };
                (first.clone(), None)
            }
        };

        let mut created = 0;
        for target in &settings.target_languages {
            if language_utils::language_codes_match(target, &source_language) {
                continue;
            }
            let satisfied = sidecars
                .iter()
                .any(|s| language_utils::language_codes_match(&s.language, target));
            if satisfied {
                continue;
            }

            self.service
                .create_request(
                    TranslatableSubtitle {
                        media_id: media.id,
                        media_kind: media.kind,
                        title: media.title.clone(),
                        source_language: source_language.clone(),
                        target_language: target.clone(),
                        subtitle_path: subtitle_path.clone(),
                    },
                    false,
                )
                .await?;
            created += 1;
        }

        Ok(created)
    }

    /// Daily housekeeping: integrity sweep, orphan cleanup, old request
    /// retention
    async fn housekeeping(&self) -> Result<()> {
        self.integrity_sweep().await?;
        self.orphan_cleanup().await?;

        let automation = self.settings.automation_settings().await?;
        let removed = self
            .repo
            .delete_old_requests(automation.request_retention_days)
            .await?;
        if removed > 0 {
            info!("Removed {} old request rows", removed);
        }
        Ok(())
    }

    /// Validate the translated sidecars of completed media; a failing file
    /// is deleted and the media goes back to Pending
    pub async fn integrity_sweep(&self) -> Result<usize> {
        let settings = self.settings.translation_settings().await?;
        if !settings.integrity_validation_enabled {
            return Ok(0);
        }

        let config = IntegrityConfig {
            min_ratio: settings.validation_min_ratio,
        };
        let mut failures = 0;
        let mut offset = 0;

        loop {
            let page = self.repo.list_media(None, None, offset, 200).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for media in page {
                if media.translation_state != TranslationState::Complete {
                    continue;
                }
                failures += self.check_media_targets(&media, &settings, &config).await?;
            }
        }

        if failures > 0 {
            warn!("Integrity sweep removed {} failing targets", failures);
        }
        Ok(failures)
    }

    async fn check_media_targets(
        &self,
        media: &MediaRecord,
        settings: &crate::settings::TranslationSettings,
        config: &IntegrityConfig,
    ) -> Result<usize> {
        let container = media.container_path();
        let sidecars = FileManager::find_sidecars(&container, settings.output_tag())?;

        let source = settings.source_languages.iter().find_map(|configured| {
            sidecars
                .iter()
                .find(|s| language_utils::language_codes_match(&s.language, configured))
        });
        let Some(source) = source else {
            return Ok(0);
        };

        let mut failures = 0;
        for target in sidecars.iter().filter(|s| s.tagged) {
            if source.path == target.path {
                continue;
            }
            if let Err(reason) = integrity::validate_files(&source.path, &target.path, config) {
                warn!(
                    "Integrity sweep: removing {:?} ({})",
                    target.path.file_name().unwrap_or_default(),
                    reason
                );
                if let Err(e) = std::fs::remove_file(&target.path) {
                    warn!("Failed to remove {:?}: {}", target.path, e);
                    continue;
                }
                self.repo
                    .append_cleanup_log(
                        &target.path.to_string_lossy(),
                        &format!("integrity: {}", reason),
                    )
                    .await?;
                self.state_engine.refresh(media).await?;
                failures += 1;
            }
        }

        Ok(failures)
    }

    /// Remove tagged sidecars whose media container was renamed or deleted
    pub async fn orphan_cleanup(&self) -> Result<usize> {
        let settings = self.settings.translation_settings().await?;
        let Some(tag) = settings.output_tag() else {
            return Ok(0);
        };

        let mut directories: HashSet<String> = HashSet::new();
        let mut offset = 0;
        loop {
            let page = self.repo.list_media(None, None, offset, 200).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            for media in page {
                directories.insert(media.path.clone());
            }
        }

        let mut removed = 0;
        for directory in directories {
            if !Path::new(&directory).is_dir() {
                continue;
            }
            let orphans = FileManager::find_orphaned_sidecars(&directory, tag)?;
            for orphan in orphans {
                info!("Removing orphaned sidecar {:?}", orphan);
                if let Err(e) = std::fs::remove_file(&orphan) {
                    warn!("Failed to remove orphan {:?}: {}", orphan, e);
                    continue;
                }
                self.repo
                    .append_cleanup_log(&orphan.to_string_lossy(), "media file renamed or removed")
                    .await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NoopIndexer;
    use crate::queue::EventBus;
    use crate::settings::keys;
    use crate::workers::WorkerPool;
    use tempfile::TempDir;

    #[test]
    fn test_parse_schedule_units() {
        assert_eq!(parse_schedule("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_schedule("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_schedule("6h"), Some(Duration::from_secs(21_600)));
        assert_eq!(parse_schedule("1d"), Some(Duration::from_secs(86_400)));
        // Bare numbers are minutes
        assert_eq!(parse_schedule("30"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_schedule(""), None);
        assert_eq!(parse_schedule("soon"), None);
    }

    struct Fixture {
        scheduler: Arc<Scheduler>,
        repo: Repository,
        settings: SettingsStore,
        library: TempDir,
    }

    async fn fixture() -> Fixture {
        let repo = Repository::new_in_memory().unwrap();
        let settings = SettingsStore::new(repo.clone());
        settings.seed_defaults().await.unwrap();
        settings.set(keys::SOURCE_LANGUAGES, "en").await.unwrap();
        settings.set(keys::TARGET_LANGUAGES, "ro,fr").await.unwrap();
        settings.set(keys::AUTOMATION_ENABLED, "true").await.unwrap();

        let pool = WorkerPool::new(2);
        let service = TranslationRequestService::new(repo.clone(), pool, EventBus::new());
        let state_engine = MediaStateEngine::new(repo.clone(), settings.clone());
        let scheduler = Scheduler::new(
            repo.clone(),
            settings.clone(),
            state_engine,
            service,
            Arc::new(NoopIndexer),
            CancellationToken::new(),
        );

        Fixture {
            scheduler,
            repo,
            settings,
            library: TempDir::new().unwrap(),
        }
    }

    async fn add_media(fixture: &Fixture, external_id: i64) -> MediaRecord {
        let dir = fixture.library.path().join(format!("m{}", external_id));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("movie.mkv"), b"fake").unwrap();
        std::fs::write(
            dir.join("movie.en.srt"),
            "1\n00:00:01,000 --> 00:00:02,000\nHi\n\n",
        )
        .unwrap();

        let id = fixture
            .repo
            .upsert_media(&MediaRecord {
                id: 0,
                external_id,
                kind: crate::database::MediaKind::Movie,
                season_id: None,
                title: format!("Movie {}", external_id),
                path: dir.to_string_lossy().to_string(),
                file_name: "movie.mkv".into(),
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
            .unwrap();
        fixture.repo.get_media(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_for_media_creates_requests_for_missing_targets() {
        let fixture = fixture().await;
        let media = add_media(&fixture, 1).await;

        let created = fixture.scheduler.enqueue_for_media(&media).await.unwrap();

        assert_eq!(created, 2);
        assert_eq!(
            fixture.repo.get_active_request_count().await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_enqueue_for_media_skips_satisfied_targets() {
        let fixture = fixture().await;
        let media = add_media(&fixture, 1).await;
        // Romanian already exists
        std::fs::write(
            Path::new(&media.path).join("movie.ro.srt"),
            "1\n00:00:01,000 --> 00:00:02,000\nSalut\n\n",
        )
        .unwrap();

        let created = fixture.scheduler.enqueue_for_media(&media).await.unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_translation_sweep_respects_automation_flag() {
        let fixture = fixture().await;
        add_media(&fixture, 1).await;
        fixture
            .settings
            .set(keys::AUTOMATION_ENABLED, "false")
            .await
            .unwrap();

        fixture.scheduler.translation_sweep().await.unwrap();
        assert_eq!(fixture.repo.get_active_request_count().await.unwrap(), 0);

        fixture
            .settings
            .set(keys::AUTOMATION_ENABLED, "true")
            .await
            .unwrap();
        fixture.scheduler.translation_sweep().await.unwrap();
        assert!(fixture.repo.get_active_request_count().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_orphan_cleanup_removes_tagged_strays() {
        let fixture = fixture().await;
        let media = add_media(&fixture, 1).await;
        let dir = Path::new(&media.path);
        // Tagged sidecar of a renamed media file
        std::fs::write(dir.join("old-name.translarr.ro.srt"), b"x").unwrap();
        // Untagged foreign sidecar must survive
        std::fs::write(dir.join("old-name.ro.srt"), b"x").unwrap();

        let removed = fixture.scheduler.orphan_cleanup().await.unwrap();

        assert_eq!(removed, 1);
        assert!(!dir.join("old-name.translarr.ro.srt").exists());
        assert!(dir.join("old-name.ro.srt").exists());

        let logs = fixture.repo.get_cleanup_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_integrity_sweep_removes_failing_targets() {
        let fixture = fixture().await;
        let media = add_media(&fixture, 1).await;
        let dir = Path::new(&media.path);

        // A tagged target full of drawing output
        std::fs::write(
            dir.join("movie.translarr.ro.srt"),
            "1\n00:00:01,000 --> 00:00:02,000\nm 0 0 l 100 0 100 100 0 100\n\n",
        )
        .unwrap();
        fixture
            .repo
            .update_media_state(media.id, TranslationState::Complete, 1)
            .await
            .unwrap();

        let failures = fixture.scheduler.integrity_sweep().await.unwrap();

        assert_eq!(failures, 1);
        assert!(!dir.join("movie.translarr.ro.srt").exists());
    }
}
