/*!
 * Integrity validation of translated output.
 *
 * Runs before a target file becomes visible: cue-count ratio against the
 * source, detection of hallucinated drawing output, and structural timing
 * checks. The pipeline deletes the target and fails the request when a
 * check does not pass.
 */

use log::warn;
use std::path::Path;

use crate::subtitles::{formatting, SubtitleDocument};

/// Integrity tuning
#[derive(Debug, Clone, Copy)]
pub struct IntegrityConfig {
    /// Minimum target/source cue-count ratio
    pub min_ratio: f64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self { min_ratio: 0.5 }
    }
}

/// Validate a translated document against its source.
///
/// `Ok(())` on pass; `Err(reason)` with a short machine-readable reason on
/// failure. The target may carry one extra leading note cue.
pub fn validate_documents(
    source: &SubtitleDocument,
    target: &SubtitleDocument,
    config: &IntegrityConfig,
) -> Result<(), String> {
    let source_cues = source.cues();
    let target_cues = target.cues();

    let minimum = (source_cues.len() as f64 * config.min_ratio).ceil() as usize;
    if target_cues.len() < minimum {
        return Err(format!(
            "count: target has {} cues, need at least {} of {}",
            target_cues.len(),
            minimum,
            source_cues.len()
        ));
    }

    // An inserted note cue shifts target positions by one
    let offset = target_cues.len().saturating_sub(source_cues.len()).min(1);

    for (index, cue) in target_cues.iter().enumerate() {
        if cue.start_ms > cue.end_ms {
            return Err(format!(
                "timing: cue {} ends before it starts ({} > {})",
                index, cue.start_ms, cue.end_ms
            ));
        }
        if index + 1 < target_cues.len() && target_cues[index + 1].start_ms < cue.start_ms {
            return Err(format!("timing: cue {} is out of order", index + 1));
        }

        // A drawing in the output is only legitimate when the matching
        // source cue already was one (passed through unchanged)
        if index >= offset && formatting::is_ass_drawing_command(&cue.text) {
            let source_was_drawing = source_cues
                .get(index - offset)
                .map(|s| formatting::is_ass_drawing_command(&s.text))
                .unwrap_or(false);
            if !source_was_drawing {
                return Err("drawings".to_string());
            }
        }
    }

    Ok(())
}

/// File-level validation used by the integrity sweep
pub fn validate_files<P: AsRef<Path>>(
    source_path: P,
    target_path: P,
    config: &IntegrityConfig,
) -> Result<(), String> {
    let source = SubtitleDocument::load(source_path.as_ref())
        .map_err(|e| format!("source unreadable: {}", e))?;
    let target = SubtitleDocument::load(target_path.as_ref())
        .map_err(|e| format!("target unreadable: {}", e))?;

    let result = validate_documents(&source, &target, config);
    if let Err(reason) = &result {
        warn!(
            "Integrity check failed for {:?}: {}",
            target_path.as_ref(),
            reason
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srt(cues: &[(&str, u64, u64)]) -> SubtitleDocument {
        let mut content = String::new();
        for (i, (text, start, end)) in cues.iter().enumerate() {
            content.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                crate::subtitles::cue::Cue::format_srt_timestamp(*start),
                crate::subtitles::cue::Cue::format_srt_timestamp(*end),
                text
            ));
        }
        SubtitleDocument::parse(&content).unwrap()
    }

    #[test]
    fn test_matching_documents_pass() {
        let source = srt(&[("Hello", 0, 1000), ("World", 2000, 3000)]);
        let target = srt(&[("Salut", 0, 1000), ("Lume", 2000, 3000)]);

        assert!(validate_documents(&source, &target, &IntegrityConfig::default()).is_ok());
    }

    #[test]
    fn test_count_ratio_rejects_thin_output() {
        let source = srt(&[
            ("a", 0, 100),
            ("b", 200, 300),
            ("c", 400, 500),
            ("d", 600, 700),
        ]);
        let target = srt(&[("x", 0, 100)]);

        let reason =
            validate_documents(&source, &target, &IntegrityConfig::default()).unwrap_err();
        assert!(reason.starts_with("count"));
    }

    #[test]
    fn test_hallucinated_drawings_are_rejected() {
        let source = srt(&[("Hello", 0, 1000)]);
        let target = srt(&[("m 0 0 l 100 0 100 100 0 100", 0, 1000)]);

        let reason =
            validate_documents(&source, &target, &IntegrityConfig::default()).unwrap_err();
        assert_eq!(reason, "drawings");
    }

    #[test]
    fn test_passed_through_drawings_are_accepted() {
        let drawing = "m 0 0 l 100 0 100 100 0 100";
        let source = srt(&[(drawing, 0, 1000), ("Hello", 2000, 3000)]);
        let target = srt(&[(drawing, 0, 1000), ("Salut", 2000, 3000)]);

        assert!(validate_documents(&source, &target, &IntegrityConfig::default()).is_ok());
    }

    #[test]
    fn test_leading_note_cue_does_not_break_alignment() {
        let source = srt(&[("Hello", 1000, 2000)]);
        let mut target = srt(&[("Salut", 1000, 2000)]);
        target.insert_note_cue("Machine translated".into());

        assert!(validate_documents(&source, &target, &IntegrityConfig::default()).is_ok());
    }

    #[test]
    fn test_backwards_timing_is_rejected() {
        let source = srt(&[("Hello", 0, 1000)]);
        // Build a malformed target directly since the parser would reject it
        let mut target = srt(&[("Salut", 0, 1000)]);
        target.set_cue_end(0, 0);
        if let SubtitleDocument::Srt(file) = &mut target {
            file.cues[0].start_ms = 500;
        }

        let reason =
            validate_documents(&source, &target, &IntegrityConfig::default()).unwrap_err();
        assert!(reason.starts_with("timing"));
    }

    #[test]
    fn test_validate_files_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let source_path = dir.path().join("a.en.srt");
        let target_path = dir.path().join("a.ro.srt");
        std::fs::write(&source_path, "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n").unwrap();
        std::fs::write(&target_path, "1\n00:00:01,000 --> 00:00:02,000\nSalut\n\n").unwrap();

        assert!(validate_files(&source_path, &target_path, &IntegrityConfig::default()).is_ok());

        std::fs::write(&target_path, "garbage").unwrap();
        assert!(validate_files(&source_path, &target_path, &IntegrityConfig::default()).is_err());
    }
}
