use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::language_utils;

// File and sidecar utilities.
//
// Sidecars are named `<media stem>[.<tag>].<lang>.<ext>`; the tag marks
// files written by this application so the orphan cleanup never touches
// foreign subtitles.

/// Subtitle extensions recognized as sidecars
pub const SIDECAR_EXTENSIONS: &[&str] = &["srt", "ass"];

/// A subtitle file found next to a media container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    /// Full path of the subtitle file
    pub path: PathBuf,
    /// Normalized ISO 639-2/T language code
    pub language: String,
    /// Whether the file name carries the application tag
    pub tagged: bool,
}

/// File operations utility
pub struct FileManager;

impl FileManager {
    /// Check file existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    /// Create a directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Build the output path for a translated sidecar next to the media
    /// container: `<stem>[.<tag>].<lang>.<ext>`
    pub fn sidecar_path<P: AsRef<Path>>(
        media_file: P,
        tag: Option<&str>,
        language: &str,
        extension: &str,
    ) -> PathBuf {
        let media_file = media_file.as_ref();
        let stem = media_file.file_stem().unwrap_or_default();

        let mut name = stem.to_string_lossy().to_string();
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            name.push('.');
            name.push_str(tag);
        }
        name.push('.');
        name.push_str(language);
        name.push('.');
        name.push_str(extension);

        media_file.with_file_name(name)
    }

    /// Parse a sidecar file name belonging to the given media stem.
    /// Returns None when the name does not follow the sidecar convention.
    fn parse_sidecar(path: &Path, media_stem: &str, tag: Option<&str>) -> Option<Sidecar> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        if !SIDECAR_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }

        let stem = path.file_stem()?.to_str()?;
        let (remainder, language_part) = stem.rsplit_once('.')?;

        let (base, tagged) = match tag.filter(|t| !t.is_empty()) {
            Some(tag) if remainder.ends_with(&format!(".{}", tag)) => {
                (&remainder[..remainder.len() - tag.len() - 1], true)
            }
            _ => (remainder, false),
        };

        if base != media_stem {
            return None;
        }

        let language = language_utils::normalize_to_part2t(language_part).ok()?;
        Some(Sidecar {
            path: path.to_path_buf(),
            language,
            tagged,
        })
    }

    /// Find subtitle sidecars belonging to a media container
    pub fn find_sidecars<P: AsRef<Path>>(media_file: P, tag: Option<&str>) -> Result<Vec<Sidecar>> {
        let media_file = media_file.as_ref();
        let dir = media_file
            .parent()
            .ok_or_else(|| anyhow!("Media file has no parent directory: {:?}", media_file))?;
        let media_stem = media_file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Media file has no stem: {:?}", media_file))?;

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sidecars = Vec::new();
        for entry in fs::read_dir(dir).context("Failed to read media directory")? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(sidecar) = Self::parse_sidecar(&path, media_stem, tag) {
                sidecars.push(sidecar);
            }
        }

        sidecars.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(sidecars)
    }

    /// Whether a sidecar exists for a given language
    pub fn has_sidecar_for_language<P: AsRef<Path>>(
        media_file: P,
        tag: Option<&str>,
        language: &str,
    ) -> Result<bool> {
        let wanted = language_utils::normalize_to_part2t(language)?;
        let sidecars = Self::find_sidecars(media_file, tag)?;
        Ok(sidecars.iter().any(|s| s.language == wanted))
    }

    /// Write a file atomically: contents land in a sibling temporary file
    /// that is renamed over the target on success. The temporary never stays
    /// behind on failure.
    pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("Target path has no parent directory: {:?}", path))?;
        Self::ensure_dir(dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".translarr-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .context("Failed to create temporary file")?;

        temp.write_all(contents)
            .context("Failed to write temporary file")?;
        temp.flush()?;

        temp.persist(path)
            .map_err(|e| anyhow!("Failed to move temporary file into place: {}", e.error))?;
        Ok(())
    }

    /// Scan a library directory for tagged sidecars whose media container no
    /// longer exists. Only files carrying the tag are candidates.
    pub fn find_orphaned_sidecars<P: AsRef<Path>>(library_root: P, tag: &str) -> Result<Vec<PathBuf>> {
        if tag.is_empty() {
            return Ok(Vec::new());
        }

        let mut orphans = Vec::new();
        let marker = format!(".{}.", tag);

        for entry in WalkDir::new(library_root.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !SIDECAR_EXTENSIONS.contains(&extension.to_lowercase().as_str()) {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(tag_at) = name.find(&marker) else {
                continue;
            };

            // A media container with the same stem must still exist
            let media_stem = &name[..tag_at];
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let has_media = fs::read_dir(dir)
                .map(|entries| {
                    entries.filter_map(|e| e.ok()).any(|e| {
                        let p = e.path();
                        p.is_file()
                            && p.file_stem().and_then(|s| s.to_str()) == Some(media_stem)
                            && p.extension()
                                .and_then(|e| e.to_str())
                                .map(|e| !SIDECAR_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                                .unwrap_or(false)
                    })
                })
                .unwrap_or(false);

            if !has_media {
                orphans.push(path.to_path_buf());
            }
        }

        Ok(orphans)
    }
}
