/*!
 * End-to-end subtitle pipeline.
 *
 * One run covers a single translation request: resolve the source subtitle
 * (sidecar or embedded extraction), parse, filter, batch with wrapper
 * context, translate through the gated provider with fallback, repair
 * deferred failures, post-process, validate integrity and write the target
 * sidecar atomically.
 */

use async_trait::async_trait;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::database::{MediaRecord, Repository, TranslationRequestRecord};
use crate::errors::TranslationError;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::media::probe::SubtitleProber;
use crate::media::scoring;
use crate::providers::gate::UsageGate;
use crate::providers::{self, Provider};
use crate::settings::{BatchRetryMode, SettingsStore, TranslationSettings};
use crate::subtitles::{formatting, SubtitleDocument};
use super::batching::{self, ContextWindow};
use super::fallback::{self, FallbackConfig};
use super::integrity::{self, IntegrityConfig};
use super::repair::{self, FailedPosition};
use super::retry::{GatedProvider, RetryPolicy};

/// Sink for request-scoped progress and audit entries; implemented by the
/// request service
#[async_trait]
pub trait RequestReporter: Send + Sync {
    /// Report progress in percent; deliveries are monotonic per request
    async fn progress(&self, request_id: i64, progress: i64);

    /// Append an audit entry to the request log
    async fn log(&self, request_id: i64, level: &str, message: &str, details: Option<String>);
}

/// Result of a successful pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Path of the written target sidecar
    pub output_path: PathBuf,
    /// Cues that were translated
    pub translated_count: usize,
    /// Cues passed through unchanged (drawings, meaningless lines)
    pub skipped_count: usize,
}

/// Builds the provider for a settings snapshot; swappable in tests
pub type ProviderFactory = Arc<
    dyn Fn(&TranslationSettings) -> Result<Arc<dyn Provider>, crate::errors::ProviderError>
        + Send
        + Sync,
>;

/// The translation execution engine
#[derive(Clone)]
pub struct SubtitlePipeline {
    repo: Repository,
    settings: SettingsStore,
    gate: UsageGate,
    provider_factory: ProviderFactory,
}

impl SubtitlePipeline {
    /// Create the pipeline with the standard provider wiring
    pub fn new(repo: Repository, settings: SettingsStore, gate: UsageGate) -> Self {
        Self::with_provider_factory(repo, settings, gate, Arc::new(providers::create_provider))
    }

    /// Create the pipeline with a custom provider factory
    pub fn with_provider_factory(
        repo: Repository,
        settings: SettingsStore,
        gate: UsageGate,
        provider_factory: ProviderFactory,
    ) -> Self {
        Self {
            repo,
            settings,
            gate,
            provider_factory,
        }
    }

    /// Run one request end to end. Cancellation is honored between batches
    /// and at every I/O boundary; the per-request timeout is enforced by the
    /// caller.
    pub async fn run(
        &self,
        request: &TranslationRequestRecord,
        token: &CancellationToken,
        reporter: &dyn RequestReporter,
    ) -> Result<PipelineOutcome, TranslationError> {
        let settings = self
            .settings
            .translation_settings()
            .await
            .map_err(infra)?;

        let media = self
            .repo
            .get_media_by_kind(request.media_kind, request.media_id)
            .await
            .map_err(infra)?;

        // 1. Source resolution
        let source_path = self
            .resolve_source(request, media.as_ref(), &settings, token, reporter)
            .await?;
        if token.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }

        // 2. Parse
        let source_doc = SubtitleDocument::load(&source_path)?;
        let mut doc = source_doc.clone();
        let cues = doc.cues();

        // 3. Filter
        let mut translatable: Vec<usize> = Vec::new();
        let mut drawings: Vec<usize> = Vec::new();
        let mut skipped = 0usize;
        for cue in &cues {
            if formatting::is_ass_drawing_command(&cue.text) {
                drawings.push(cue.position);
                skipped += 1;
            } else if formatting::is_meaningless(&cue.text) {
                skipped += 1;
            } else {
                translatable.push(cue.position);
            }
        }

        if settings.clean_source_ass_drawings {
            for &position in &drawings {
                doc.set_cue_text(position, String::new());
            }
        }

        reporter
            .log(
                request.id,
                "info",
                &format!(
                    "Parsed {:?}: {} cues, {} to translate, {} passed through",
                    source_path.file_name().unwrap_or_default(),
                    cues.len(),
                    translatable.len(),
                    skipped
                ),
                None,
            )
            .await;

        // 4. Provider behind gate and retry policy
        let provider = (self.provider_factory)(&settings)?;
        let provider = GatedProvider::new(
            provider,
            self.gate.clone(),
            RetryPolicy {
                max_retries: settings.max_retries,
                initial_delay: Duration::from_secs(settings.retry_delay_secs),
                multiplier: settings.retry_delay_multiplier,
            },
            settings.ai_model.clone(),
        );

        // 5. Translate
        let fallback_config = FallbackConfig {
            enabled: settings.enable_batch_fallback,
            max_split_attempts: settings.max_batch_split_attempts,
        };
        let mut applied: HashMap<usize, String> = HashMap::new();
        let mut failed: Vec<FailedPosition> = Vec::new();

        if settings.use_batch_translation {
            self.translate_batched(
                request,
                &provider,
                &settings,
                &fallback_config,
                &cues,
                &translatable,
                &mut applied,
                &mut failed,
                token,
                reporter,
            )
            .await?;
        } else {
            self.translate_line_by_line(
                request,
                &provider,
                &settings,
                &cues,
                &translatable,
                &mut applied,
                &mut failed,
                token,
                reporter,
            )
            .await?;
        }

        // 6. Deferred repair
        if !failed.is_empty() {
            if settings.batch_retry_mode == BatchRetryMode::Deferred {
                reporter
                    .log(
                        request.id,
                        "warn",
                        &format!("Repairing {} positions after the main pass", failed.len()),
                        None,
                    )
                    .await;

                let repair_batch = repair::build_contextual_repair_batch(
                    &failed,
                    &cues,
                    settings.repair_context_radius,
                    true,
                );
                let recovered = repair::execute_repair(
                    &repair_batch,
                    &provider,
                    &fallback_config,
                    &request.source_language,
                    &request.target_language,
                    settings.max_batch_size,
                    settings.repair_max_retries,
                    token,
                )
                .await?;

                for (position, translation) in recovered {
                    if self.accept_translation(&settings, &translation) {
                        applied.insert(position, translation);
                    }
                }
            }

            let still_missing: Vec<usize> = failed
                .iter()
                .map(|f| f.position)
                .filter(|p| !applied.contains_key(p))
                .collect();
            if !still_missing.is_empty() {
                return Err(TranslationError::UntranslatedPositions(still_missing));
            }
        }

        // 7. Apply translations and post-process
        let translated_count = applied.len();
        for (position, translation) in applied {
            let text = if settings.strip_subtitle_formatting {
                formatting::strip_inline_tags(&translation)
            } else {
                translation
            };
            doc.set_cue_text(position, text);
        }

        if settings.fix_overlapping_subtitles {
            let current = doc.cues();
            for i in 0..current.len().saturating_sub(1) {
                if current[i].end_ms > current[i + 1].start_ms {
                    doc.set_cue_end(i, current[i + 1].start_ms);
                }
            }
        }

        if settings.add_translator_info {
            let source_name = language_utils::get_language_name(&request.source_language)
                .unwrap_or_else(|_| request.source_language.clone());
            let target_name = language_utils::get_language_name(&request.target_language)
                .unwrap_or_else(|_| request.target_language.clone());
            doc.insert_note_cue(format!(
                "Translated from {} to {} ({})",
                source_name,
                target_name,
                provider.name()
            ));
        }

        // 8. Integrity, then atomic write
        let output_path = self.output_path(request, media.as_ref(), &source_path, &settings, &doc);

        if settings.validation_enabled && settings.integrity_validation_enabled {
            let config = IntegrityConfig {
                min_ratio: settings.validation_min_ratio,
            };
            if let Err(reason) = integrity::validate_documents(&source_doc, &doc, &config) {
                reporter
                    .log(
                        request.id,
                        "error",
                        &format!("IntegrityFailed:{}", reason),
                        None,
                    )
                    .await;
                remove_stale_target(&output_path);
                return Err(TranslationError::IntegrityFailed(reason));
            }
        }

        if token.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }

        doc.write(&output_path)?;
        reporter.progress(request.id, 100).await;
        info!(
            "Translated {:?} -> {:?} ({} cues)",
            source_path.file_name().unwrap_or_default(),
            output_path.file_name().unwrap_or_default(),
            translated_count
        );

        Ok(PipelineOutcome {
            output_path,
            translated_count,
            skipped_count: skipped,
        })
    }

    /// Batched translation pass with per-batch fallback
    #[allow(clippy::too_many_arguments)]
    async fn translate_batched(
        &self,
        request: &TranslationRequestRecord,
        provider: &GatedProvider,
        settings: &TranslationSettings,
        fallback_config: &FallbackConfig,
        cues: &[crate::subtitles::cue::Cue],
        translatable: &[usize],
        applied: &mut HashMap<usize, String>,
        failed: &mut Vec<FailedPosition>,
        token: &CancellationToken,
        reporter: &dyn RequestReporter,
    ) -> Result<(), TranslationError> {
        let context = if settings.batch_context_enabled {
            ContextWindow {
                enabled: true,
                before: settings.batch_context_before,
                after: settings.batch_context_after,
            }
        } else {
            ContextWindow::disabled()
        };

        let batches =
            batching::build_batches(cues, translatable, settings.max_batch_size, context);
        let batch_count = batches.len().max(1);

        for (done, batch) in batches.iter().enumerate() {
            if token.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            let results = match settings.batch_retry_mode {
                BatchRetryMode::Immediate => fallback::translate_with_fallback(
                    provider,
                    batch,
                    &request.source_language,
                    &request.target_language,
                    fallback_config,
                    token,
                )
                .await
                .map(|r| (r, Vec::new()))?,
                BatchRetryMode::Deferred => fallback::translate_batch_best_effort(
                    provider,
                    batch,
                    &request.source_language,
                    &request.target_language,
                    fallback_config,
                    token,
                )
                .await?,
            };

            let (results, missing) = results;
            let mut rejected: HashSet<usize> = HashSet::new();
            for (position, translation) in results {
                if self.accept_translation(settings, &translation) {
                    applied.insert(position, translation);
                } else {
                    rejected.insert(position);
                }
            }

            for item in &batch.items {
                let unresolved = missing.contains(&item.position) || rejected.contains(&item.position);
                if unresolved && !applied.contains_key(&item.position) {
                    failed.push(FailedPosition {
                        position: item.position,
                        line: item.line.clone(),
                        batch_index: batch.index,
                    });
                }
            }

            let progress = (100 * (done + 1) / batch_count) as i64;
            reporter.progress(request.id, progress).await;
            debug!(
                "Request {}: batch {}/{} done",
                request.id,
                done + 1,
                batch_count
            );
        }

        // Immediate mode has no repair stage; hallucination rejections fail
        // the request here
        if settings.batch_retry_mode == BatchRetryMode::Immediate && !failed.is_empty() {
            return Err(TranslationError::UntranslatedPositions(
                failed.iter().map(|f| f.position).collect(),
            ));
        }

        Ok(())
    }

    /// Line-by-line translation pass (batching disabled)
    #[allow(clippy::too_many_arguments)]
    async fn translate_line_by_line(
        &self,
        request: &TranslationRequestRecord,
        provider: &GatedProvider,
        settings: &TranslationSettings,
        cues: &[crate::subtitles::cue::Cue],
        translatable: &[usize],
        applied: &mut HashMap<usize, String>,
        failed: &mut Vec<FailedPosition>,
        token: &CancellationToken,
        reporter: &dyn RequestReporter,
    ) -> Result<(), TranslationError> {
        let total = translatable.len().max(1);

        for (done, &position) in translatable.iter().enumerate() {
            if token.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            let line = &cues[position].text;
            match provider
                .translate_single(line, &request.source_language, &request.target_language, token)
                .await
            {
                Ok(translation) if self.accept_translation(settings, &translation) => {
                    applied.insert(position, translation);
                }
                Ok(_) => failed.push(FailedPosition {
                    position,
                    line: line.clone(),
                    batch_index: done,
                }),
                Err(e) if e.pauses_provider() => return Err(e.into()),
                Err(crate::errors::ProviderError::InvalidResponse(_)) => {
                    failed.push(FailedPosition {
                        position,
                        line: line.clone(),
                        batch_index: done,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            reporter
                .progress(request.id, (100 * (done + 1) / total) as i64)
                .await;
        }

        Ok(())
    }

    /// Reject provider output that looks like hallucinated drawing commands
    fn accept_translation(&self, settings: &TranslationSettings, translation: &str) -> bool {
        if !settings.strip_ass_drawing_commands {
            return true;
        }
        !formatting::is_ass_drawing_command(translation)
    }

    /// Resolve the subtitle to translate: explicit sidecar, already
    /// extracted stream, or fresh extraction (retried once)
    async fn resolve_source(
        &self,
        request: &TranslationRequestRecord,
        media: Option<&MediaRecord>,
        settings: &TranslationSettings,
        token: &CancellationToken,
        reporter: &dyn RequestReporter,
    ) -> Result<PathBuf, TranslationError> {
        if let Some(path) = &request.subtitle_to_translate {
            let path = PathBuf::from(path);
            if FileManager::file_exists(&path) {
                return Ok(path);
            }
            reporter
                .log(
                    request.id,
                    "warn",
                    &format!("Recorded sidecar {:?} is gone, probing embedded streams", path),
                    None,
                )
                .await;
        }

        let media = media.ok_or_else(|| {
            TranslationError::NoSuitableSource(format!(
                "media {} ({}) is not indexed",
                request.media_id, request.media_kind
            ))
        })?;

        let prober = SubtitleProber::new(
            self.repo.clone(),
            settings.probe_binary.clone(),
            settings.extract_binary.clone(),
        );

        let streams = prober.probe_media_cached(media, token).await?;
        let wanted = vec![request.source_language.clone()];
        let (_, track) =
            scoring::select_best_track(&streams, &wanted, settings.ignore_captions).ok_or_else(
                || {
                    TranslationError::NoSuitableSource(format!(
                        "no embedded track matches source language {}",
                        request.source_language
                    ))
                },
            )?;

        if track.is_extracted {
            if let Some(path) = &track.extracted_path {
                let path = PathBuf::from(path);
                if FileManager::file_exists(&path) {
                    return Ok(path);
                }
            }
        }

        reporter
            .log(
                request.id,
                "info",
                &format!(
                    "Extracting stream {} ({}) from {:?}",
                    track.stream_index,
                    track.codec_name,
                    media.file_name
                ),
                None,
            )
            .await;

        match prober.extract_stream(media, track, token).await {
            Ok(path) => Ok(path),
            Err(TranslationError::Cancelled) => Err(TranslationError::Cancelled),
            Err(first_error) => {
                // One retry per the extraction contract
                reporter
                    .log(
                        request.id,
                        "warn",
                        &format!("Extraction failed, retrying once: {}", first_error),
                        None,
                    )
                    .await;
                prober.extract_stream(media, track, token).await
            }
        }
    }

    /// Compute the output sidecar path next to the media container. Without
    /// an indexed media row the name derives from the source sidecar; with
    /// `remove_language_tag` a trailing source-language tag is stripped from
    /// that base first.
    fn output_path(
        &self,
        request: &TranslationRequestRecord,
        media: Option<&MediaRecord>,
        source_path: &Path,
        settings: &TranslationSettings,
        doc: &SubtitleDocument,
    ) -> PathBuf {
        let base = match media {
            Some(media) => media.container_path(),
            None => {
                let mut base = source_path.to_path_buf();
                if settings.remove_language_tag {
                    if let Some(stem) = base.file_stem().and_then(|s| s.to_str()) {
                        if let Some((without_tag, tag)) = stem.rsplit_once('.') {
                            if language_utils::validate_language_code(tag).is_ok() {
                                base = base.with_file_name(without_tag);
                            }
                        }
                    }
                }
                base
            }
        };
        let language = language_utils::normalize_to_part1_or_part2t(&request.target_language)
            .unwrap_or_else(|_| request.target_language.clone());
        let extension = doc.format().extension();

        FileManager::sidecar_path(&base, settings.output_tag(), &language, extension)
    }

    /// One-line connectivity check used by the operator test endpoint
    pub async fn test_translate_line(
        &self,
        line: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        let settings = self
            .settings
            .translation_settings()
            .await
            .map_err(infra)?;
        let provider = (self.provider_factory)(&settings)?;
        let provider = GatedProvider::new(
            provider,
            self.gate.clone(),
            RetryPolicy {
                max_retries: 0,
                initial_delay: Duration::from_secs(1),
                multiplier: 1.0,
            },
            settings.ai_model.clone(),
        );

        let token = CancellationToken::new();
        provider
            .translate_single(line, source_language, target_language, &token)
            .await
            .map_err(TranslationError::from)
    }
}

/// Map infrastructure failures (settings/store unavailable) onto the I/O
/// error kind
fn infra(e: anyhow::Error) -> TranslationError {
    TranslationError::Io(std::io::Error::other(e.to_string()))
}

/// Delete a previously written target that just failed validation
fn remove_stale_target(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Failed to delete rejected target {:?}: {}", path, e);
        }
    }
}
