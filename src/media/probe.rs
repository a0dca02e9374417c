/*!
 * Embedded subtitle probing and extraction.
 *
 * Streams are enumerated and extracted through external media-analysis
 * binaries invoked with argument vectors (never a shell string). This module
 * is the only writer of `embedded_subtitles` rows.
 */

use anyhow::Result;
use log::{info, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::database::{EmbeddedSubtitleRecord, MediaRecord, Repository};
use crate::errors::TranslationError;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::subtitles::SubtitleFormat;

/// Codec names the extractor can turn into a textual sidecar
const TEXT_BASED_CODECS: &[&str] = &[
    "subrip", "srt", "ass", "ssa", "mov_text", "text", "webvtt", "subviewer", "microdvd", "mpl2",
    "jacosub", "sami", "realtext", "vplayer",
];

/// Whether a codec name refers to a text-based subtitle format
pub fn is_text_based_codec(codec_name: &str) -> bool {
    TEXT_BASED_CODECS.contains(&codec_name.to_lowercase().as_str())
}

/// Sidecar format a codec extracts into
fn extraction_format(codec_name: &str) -> SubtitleFormat {
    match codec_name.to_lowercase().as_str() {
        "ass" | "ssa" => SubtitleFormat::Ass,
        _ => SubtitleFormat::Srt,
    }
}

/// Prober/extractor over the configured analysis binaries
pub struct SubtitleProber {
    repo: Repository,
    probe_binary: String,
    extract_binary: String,
}

impl SubtitleProber {
    /// Create a prober using the configured binary names
    pub fn new(repo: Repository, probe_binary: String, extract_binary: String) -> Self {
        Self {
            repo,
            probe_binary,
            extract_binary,
        }
    }

    /// Check that a binary can be invoked (used by startup validation)
    pub async fn binary_available(binary: &str) -> bool {
        Command::new(binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Enumerate subtitle streams of the media container, persist them and
    /// return the stored rows. Replaces any previous probe result.
    pub async fn probe_media(
        &self,
        media: &MediaRecord,
        token: &CancellationToken,
    ) -> Result<Vec<EmbeddedSubtitleRecord>, TranslationError> {
        let container = media.container_path();
        if !FileManager::file_exists(&container) {
            return Err(TranslationError::ProbeFailed(format!(
                "container file does not exist: {:?}",
                container
            )));
        }

        let output = run_subprocess(
            &self.probe_binary,
            &[
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "s",
                &container.to_string_lossy(),
            ],
            token,
        )
        .await
        .map_err(map_cancel(TranslationError::ProbeFailed))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranslationError::ProbeFailed(format!(
                "{} exited with {}: {}",
                self.probe_binary, output.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let streams = parse_probe_output(&stdout, media.id)?;
        info!(
            "Probed {:?}: {} subtitle streams",
            container.file_name().unwrap_or_default(),
            streams.len()
        );

        self.repo
            .replace_embedded_subtitles(media.id, streams)
            .await
            .map_err(|e| TranslationError::ProbeFailed(e.to_string()))?;

        self.repo
            .get_embedded_subtitles(media.id)
            .await
            .map_err(|e| TranslationError::ProbeFailed(e.to_string()))
    }

    /// Return cached streams when the container was probed before, probing
    /// otherwise
    pub async fn probe_media_cached(
        &self,
        media: &MediaRecord,
        token: &CancellationToken,
    ) -> Result<Vec<EmbeddedSubtitleRecord>, TranslationError> {
        if media.indexed_at.is_some() {
            let cached = self
                .repo
                .get_embedded_subtitles(media.id)
                .await
                .map_err(|e| TranslationError::ProbeFailed(e.to_string()))?;
            if !cached.is_empty() {
                return Ok(cached);
            }
        }
        self.probe_media(media, token).await
    }

    /// Extract one stream to a sidecar next to the container. On success the
    /// row is marked extracted and the sidecar path is returned; on failure
    /// no partial file and no row update survive.
    pub async fn extract_stream(
        &self,
        media: &MediaRecord,
        stream: &EmbeddedSubtitleRecord,
        token: &CancellationToken,
    ) -> Result<PathBuf, TranslationError> {
        let container = media.container_path();
        let language = stream
            .language
            .as_deref()
            .and_then(|l| language_utils::normalize_to_part1_or_part2t(l).ok())
            .unwrap_or_else(|| "und".to_string());
        let format = extraction_format(&stream.codec_name);
        let output_path =
            FileManager::sidecar_path(&container, None, &language, format.extension());

        let map_arg = format!("0:{}", stream.stream_index);
        let result = run_subprocess(
            &self.extract_binary,
            &[
                "-y",
                "-i",
                &container.to_string_lossy(),
                "-map",
                &map_arg,
                "-c:s",
                format.extension(),
                &output_path.to_string_lossy(),
            ],
            token,
        )
        .await
        .map_err(map_cancel(TranslationError::ExtractionFailed));

        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                remove_partial(&output_path);
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(TranslationError::ExtractionFailed(format!(
                    "{} exited with {}: {}",
                    self.extract_binary, output.status, stderr
                )));
            }
            Err(e) => {
                remove_partial(&output_path);
                return Err(e);
            }
        }

        let size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            remove_partial(&output_path);
            return Err(TranslationError::ExtractionFailed(
                "extracted file is empty, stream carries no usable subtitles".to_string(),
            ));
        }

        self.repo
            .mark_subtitle_extracted(stream.id, output_path.to_string_lossy().to_string())
            .await
            .map_err(|e| TranslationError::ExtractionFailed(e.to_string()))?;

        info!(
            "Extracted stream {} of {:?} to {:?}",
            stream.stream_index,
            container.file_name().unwrap_or_default(),
            output_path.file_name().unwrap_or_default()
        );
        Ok(output_path)
    }
}

/// Run a subprocess with an argument vector, honoring cancellation.
/// Returns `Err(None)` when cancelled, `Err(Some(msg))` on spawn failure.
async fn run_subprocess(
    program: &str,
    args: &[&str],
    token: &CancellationToken,
) -> Result<std::process::Output, Option<String>> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Some(format!("failed to start {}: {}", program, e)))?;

    tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|e| Some(format!("failed to wait for {}: {}", program, e)))
        }
        _ = token.cancelled() => Err(None),
    }
}

/// Convert the subprocess error shape into the right TranslationError kind,
/// keeping cancellation distinct
fn map_cancel(
    wrap: fn(String) -> TranslationError,
) -> impl Fn(Option<String>) -> TranslationError {
    move |e| match e {
        Some(message) => wrap(message),
        None => TranslationError::Cancelled,
    }
}

/// Remove a partially written extraction output, if any
fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove partial extraction {:?}: {}", path, e);
        }
    }
}

/// Parse the probe JSON into embedded subtitle rows
fn parse_probe_output(
    stdout: &str,
    media_id: i64,
) -> Result<Vec<EmbeddedSubtitleRecord>, TranslationError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let json: Value = serde_json::from_str(stdout)
        .map_err(|e| TranslationError::ProbeFailed(format!("unparseable probe output: {}", e)))?;

    let mut records = Vec::new();
    if let Some(streams) = json.get("streams").and_then(|s| s.as_array()) {
        for stream in streams {
            let index = stream
                .get("index")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    TranslationError::ProbeFailed("stream without an index".to_string())
                })?;

            let codec_name = stream
                .get("codec_name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            let language = stream
                .get("tags")
                .and_then(|t| t.get("language"))
                .and_then(|l| l.as_str())
                .and_then(|l| language_utils::normalize_to_part2t(l).ok());

            let title = stream
                .get("tags")
                .and_then(|t| t.get("title"))
                .and_then(|l| l.as_str())
                .map(|s| s.to_string());

            let is_default = stream
                .get("disposition")
                .and_then(|d| d.get("default"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                != 0;
            let is_forced = stream
                .get("disposition")
                .and_then(|d| d.get("forced"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                != 0;

            records.push(EmbeddedSubtitleRecord {
                id: 0,
                media_id,
                stream_index: index,
                language,
                title,
                is_text_based: is_text_based_codec(&codec_name),
                codec_name,
                is_default,
                is_forced,
                is_extracted: false,
                extracted_path: None,
            });
        }
    }

    Ok(records)
}
