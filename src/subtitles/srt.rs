/*!
 * SRT subtitle parsing and emission.
 *
 * Parsing is strict on cue ordering (start times must be monotonically
 * non-decreasing) and forgiving on blank lines. Emission preserves sequence
 * numbers, the newline flavor and a leading BOM, so a file whose cue text was
 * never modified round-trips byte-identically.
 */

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::TranslationError;
use super::cue::Cue;

/// Regex for SRT timing lines
static TIMING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}:\d{2}:\d{2}[,.]\d{3})\s*-->\s*(\d{2}:\d{2}:\d{2}[,.]\d{3})\s*$").unwrap()
});

/// Parsed SRT file
#[derive(Debug, Clone)]
pub struct SrtFile {
    /// Cues in file order
    pub cues: Vec<Cue>,
    /// Whether the input started with a UTF-8 BOM
    bom: bool,
    /// Whether the input used CRLF line endings
    crlf: bool,
}

impl SrtFile {
    /// Parse SRT content. BOM and CRLF/LF are tolerated.
    pub fn parse(content: &str) -> Result<Self, TranslationError> {
        let bom = content.starts_with('\u{feff}');
        let content = content.trim_start_matches('\u{feff}');
        let crlf = content.contains("\r\n");

        let mut cues: Vec<Cue> = Vec::new();
        let mut lines = content.lines().enumerate().peekable();

        while let Some((line_no, line)) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Sequence number line
            let seq_num: usize = trimmed.parse().map_err(|_| {
                TranslationError::MalformedSubtitle(format!(
                    "expected sequence number at line {}, found {:?}",
                    line_no + 1,
                    trimmed
                ))
            })?;

            // Timing line must follow immediately
            let (timing_line_no, timing_line) = lines.next().ok_or_else(|| {
                TranslationError::MalformedSubtitle(format!(
                    "cue {} truncated: missing timing line",
                    seq_num
                ))
            })?;
            let captures = TIMING_REGEX.captures(timing_line.trim()).ok_or_else(|| {
                TranslationError::MalformedSubtitle(format!(
                    "unparseable timing at line {}: {:?}",
                    timing_line_no + 1,
                    timing_line.trim()
                ))
            })?;

            let start_ms = Cue::parse_srt_timestamp(&captures[1]).map_err(|e| {
                TranslationError::MalformedSubtitle(format!("bad start timestamp: {}", e))
            })?;
            let end_ms = Cue::parse_srt_timestamp(&captures[2]).map_err(|e| {
                TranslationError::MalformedSubtitle(format!("bad end timestamp: {}", e))
            })?;

            // Text lines until a blank line or EOF
            let mut text = String::new();
            while let Some((_, text_line)) = lines.peek() {
                if text_line.trim().is_empty() {
                    lines.next();
                    break;
                }
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(text_line.trim_end_matches('\r'));
                lines.next();
            }

            if text.is_empty() {
                return Err(TranslationError::MalformedSubtitle(format!(
                    "cue {} truncated: no text lines",
                    seq_num
                )));
            }

            if let Some(previous) = cues.last() {
                if start_ms < previous.start_ms {
                    return Err(TranslationError::MalformedSubtitle(format!(
                        "cue {} starts before its predecessor ({} < {})",
                        seq_num, start_ms, previous.start_ms
                    )));
                }
            }

            let position = cues.len();
            cues.push(Cue {
                position,
                seq_num,
                start_ms,
                end_ms,
                text,
            });
        }

        Ok(SrtFile { cues, bom, crlf })
    }

    /// Emit the file. Timecodes and sequence numbers are regenerated from the
    /// parsed values in canonical form; newline flavor and BOM are preserved.
    pub fn emit(&self) -> String {
        let newline = if self.crlf { "\r\n" } else { "\n" };
        let mut out = String::new();
        if self.bom {
            out.push('\u{feff}');
        }

        for cue in &self.cues {
            out.push_str(&cue.seq_num.to_string());
            out.push_str(newline);
            out.push_str(&Cue::format_srt_timestamp(cue.start_ms));
            out.push_str(" --> ");
            out.push_str(&Cue::format_srt_timestamp(cue.end_ms));
            out.push_str(newline);
            for line in cue.text.split('\n') {
                out.push_str(line);
                out.push_str(newline);
            }
            out.push_str(newline);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello world\n\n2\n00:00:03,000 --> 00:00:04,500\nSecond cue\nwith two lines\n\n";

    #[test]
    fn test_parse_simple_file() {
        let file = SrtFile::parse(SIMPLE).unwrap();

        assert_eq!(file.cues.len(), 2);
        assert_eq!(file.cues[0].position, 0);
        assert_eq!(file.cues[0].seq_num, 1);
        assert_eq!(file.cues[0].start_ms, 1000);
        assert_eq!(file.cues[0].end_ms, 2000);
        assert_eq!(file.cues[0].text, "Hello world");
        assert_eq!(file.cues[1].text, "Second cue\nwith two lines");
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let file = SrtFile::parse(SIMPLE).unwrap();
        assert_eq!(file.emit(), SIMPLE);
    }

    #[test]
    fn test_round_trip_preserves_crlf_and_bom() {
        let input = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nHello\r\n\r\n";
        let file = SrtFile::parse(input).unwrap();
        assert_eq!(file.emit(), input);
    }

    #[test]
    fn test_parse_tolerates_extra_blank_lines() {
        let input = "\n\n1\n00:00:01,000 --> 00:00:02,000\nHello\n\n\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n\n";
        let file = SrtFile::parse(input).unwrap();
        assert_eq!(file.cues.len(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let input = "1\n00:00:xx,000 --> 00:00:02,000\nHello\n\n";
        let err = SrtFile::parse(input).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedSubtitle(_)));
    }

    #[test]
    fn test_parse_rejects_truncated_cue() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\n";
        let err = SrtFile::parse(input).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedSubtitle(_)));
    }

    #[test]
    fn test_parse_rejects_decreasing_start_times() {
        let input = "1\n00:00:05,000 --> 00:00:06,000\nLater\n\n2\n00:00:01,000 --> 00:00:02,000\nEarlier\n\n";
        let err = SrtFile::parse(input).unwrap_err();
        assert!(matches!(err, TranslationError::MalformedSubtitle(_)));
    }

    #[test]
    fn test_equal_start_times_are_allowed() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\nA\n\n2\n00:00:01,000 --> 00:00:03,000\nB\n\n";
        let file = SrtFile::parse(input).unwrap();
        assert_eq!(file.cues.len(), 2);
    }

    #[test]
    fn test_modified_text_changes_only_that_cue() {
        let mut file = SrtFile::parse(SIMPLE).unwrap();
        file.cues[0].text = "Salut lume".into();

        let emitted = file.emit();
        assert!(emitted.contains("Salut lume"));
        assert!(emitted.contains("Second cue\nwith two lines"));
        assert!(emitted.contains("00:00:01,000 --> 00:00:02,000"));
    }
}
