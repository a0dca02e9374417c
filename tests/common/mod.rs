/*!
 * Shared fixtures for integration tests: an in-memory store, seeded
 * settings, a worker pool and a pipeline wired to a mock provider.
 */

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use translarr::database::{MediaKind, MediaRecord, Repository, TranslationState};
use translarr::media::MediaStateEngine;
use translarr::providers::gate::UsageGate;
use translarr::providers::mock::MockProvider;
use translarr::providers::Provider;
use translarr::queue::{EventBus, TranslationRequestService};
use translarr::settings::{keys, SettingsStore};
use translarr::translation::SubtitlePipeline;
use translarr::workers::WorkerPool;

/// A fully wired application core over an in-memory store
pub struct TestApp {
    pub repo: Repository,
    pub settings: SettingsStore,
    pub gate: UsageGate,
    pub pool: Arc<WorkerPool>,
    pub service: TranslationRequestService,
    pub state_engine: MediaStateEngine,
    pub pipeline: SubtitlePipeline,
    pub library: TempDir,
}

/// Build the core with the given provider answering all translation calls
pub async fn test_app(provider: Arc<MockProvider>) -> TestApp {
    let repo = Repository::new_in_memory().expect("in-memory store");
    let settings = SettingsStore::new(repo.clone());
    settings.seed_defaults().await.expect("seed settings");
    settings.set(keys::SOURCE_LANGUAGES, "en").await.unwrap();
    settings.set(keys::TARGET_LANGUAGES, "ro").await.unwrap();

    let gate = UsageGate::load(repo.clone(), settings.clone(), "mock".into())
        .await
        .expect("gate");
    let pool = WorkerPool::new(2);
    let service = TranslationRequestService::new(repo.clone(), pool.clone(), EventBus::new());
    let state_engine = MediaStateEngine::new(repo.clone(), settings.clone());

    let factory_provider: Arc<dyn Provider> = provider;
    let pipeline = SubtitlePipeline::with_provider_factory(
        repo.clone(),
        settings.clone(),
        gate.clone(),
        Arc::new(move |_| Ok(factory_provider.clone())),
    );

    TestApp {
        repo,
        settings,
        gate,
        pool,
        service,
        state_engine,
        pipeline,
        library: TempDir::new().expect("temp library"),
    }
}

impl TestApp {
    /// Add a movie with a container file and an English sidecar holding the
    /// given SRT content. Returns the media row and the sidecar path.
    pub async fn add_movie_with_sidecar(
        &self,
        external_id: i64,
        srt_content: &str,
    ) -> (MediaRecord, PathBuf) {
        let dir = self.library.path().join(format!("Movie{}", external_id));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Movie.mkv"), b"container").unwrap();
        let sidecar = dir.join("Movie.en.srt");
        std::fs::write(&sidecar, srt_content).unwrap();

        let id = self
            .repo
            .upsert_media(&MediaRecord {
                id: 0,
                external_id,
                kind: MediaKind::Movie,
                season_id: None,
                title: format!("Movie {}", external_id),
                path: dir.to_string_lossy().to_string(),
                file_name: "Movie.mkv".into(),
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
        let media = self.repo.get_media(id).await.unwrap().unwrap();
        (media, sidecar)
    }
}

/// SRT content with `n` sequential one-line cues
pub fn srt_with_cues(n: usize) -> String {
    let mut content = String::new();
    for i in 0..n {
        content.push_str(&format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},500\nline {}\n\n",
            i + 1,
            i + 1,
            i + 1,
            i
        ));
    }
    content
}
