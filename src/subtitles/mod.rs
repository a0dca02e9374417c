/*!
 * Subtitle codec and text utilities.
 *
 * Two textual formats are supported: SRT (sequential timed cues) and
 * ASS (styled events with a header section). `SubtitleDocument` gives the
 * pipeline one interface over both, addressing cues by their position in
 * the file.
 */

pub mod ass;
pub mod cue;
pub mod formatting;
pub mod srt;

use std::path::Path;

use crate::errors::TranslationError;
use crate::file_utils::FileManager;
use ass::AssFile;
use cue::Cue;
use srt::SrtFile;

/// Supported subtitle formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    /// SubRip timed text
    Srt,
    /// Advanced SubStation Alpha styled events
    Ass,
}

impl SubtitleFormat {
    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Ass => "ass",
        }
    }

    /// Guess the format from a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "srt" => Some(SubtitleFormat::Srt),
            "ass" | "ssa" => Some(SubtitleFormat::Ass),
            _ => None,
        }
    }
}

/// A parsed subtitle file of either supported format
#[derive(Debug, Clone)]
pub enum SubtitleDocument {
    /// SubRip document
    Srt(SrtFile),
    /// ASS document
    Ass(AssFile),
}

impl SubtitleDocument {
    /// Parse content, detecting the format from its structure
    pub fn parse(content: &str) -> Result<Self, TranslationError> {
        if AssFile::detect(content) {
            Ok(SubtitleDocument::Ass(AssFile::parse(content)?))
        } else {
            Ok(SubtitleDocument::Srt(SrtFile::parse(content)?))
        }
    }

    /// Load and parse a subtitle file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TranslationError> {
        let bytes = std::fs::read(path.as_ref())?;
        let content = String::from_utf8_lossy(&bytes);
        Self::parse(&content)
    }

    /// The document's format
    pub fn format(&self) -> SubtitleFormat {
        match self {
            SubtitleDocument::Srt(_) => SubtitleFormat::Srt,
            SubtitleDocument::Ass(_) => SubtitleFormat::Ass,
        }
    }

    /// Snapshot of the translatable cues, positions matching the file order.
    /// For ASS documents only Dialogue events count as cues.
    pub fn cues(&self) -> Vec<Cue> {
        match self {
            SubtitleDocument::Srt(file) => file.cues.clone(),
            SubtitleDocument::Ass(file) => file
                .dialogue_indexes()
                .into_iter()
                .enumerate()
                .map(|(position, event_index)| {
                    let event = &file.events[event_index];
                    Cue {
                        position,
                        seq_num: position + 1,
                        start_ms: event.start_ms,
                        end_ms: event.end_ms,
                        text: event.text.clone(),
                    }
                })
                .collect(),
        }
    }

    /// Number of translatable cues
    pub fn cue_count(&self) -> usize {
        match self {
            SubtitleDocument::Srt(file) => file.cues.len(),
            SubtitleDocument::Ass(file) => file.dialogue_indexes().len(),
        }
    }

    /// Replace the text of the cue at `position`
    pub fn set_cue_text(&mut self, position: usize, text: String) {
        match self {
            SubtitleDocument::Srt(file) => {
                if let Some(cue) = file.cues.get_mut(position) {
                    cue.text = text;
                }
            }
            SubtitleDocument::Ass(file) => {
                let indexes = file.dialogue_indexes();
                if let Some(&event_index) = indexes.get(position) {
                    file.events[event_index].text = text;
                }
            }
        }
    }

    /// Clamp the end time of the cue at `position`
    pub fn set_cue_end(&mut self, position: usize, end_ms: u64) {
        match self {
            SubtitleDocument::Srt(file) => {
                if let Some(cue) = file.cues.get_mut(position) {
                    cue.end_ms = end_ms;
                }
            }
            SubtitleDocument::Ass(file) => {
                let indexes = file.dialogue_indexes();
                if let Some(&event_index) = indexes.get(position) {
                    file.set_event_end(event_index, end_ms);
                }
            }
        }
    }

    /// Prepend a single informational note cue shown before the first cue
    pub fn insert_note_cue(&mut self, text: String) {
        match self {
            SubtitleDocument::Srt(file) => {
                let end = file.cues.first().map(|c| c.start_ms.min(2000)).unwrap_or(2000);
                let note = Cue {
                    position: 0,
                    seq_num: 0,
                    start_ms: 0,
                    end_ms: end.max(500),
                    text,
                };
                file.cues.insert(0, note);
                for (i, cue) in file.cues.iter_mut().enumerate() {
                    cue.position = i;
                    cue.seq_num = i + 1;
                }
            }
            SubtitleDocument::Ass(file) => {
                let end = file
                    .events
                    .iter()
                    .find(|e| e.kind == ass::EventKind::Dialogue)
                    .map(|e| e.start_ms.min(2000))
                    .unwrap_or(2000);
                file.insert_leading_dialogue(0, end.max(500), text);
            }
        }
    }

    /// Serialize the document
    pub fn emit(&self) -> String {
        match self {
            SubtitleDocument::Srt(file) => file.emit(),
            SubtitleDocument::Ass(file) => file.emit(),
        }
    }

    /// Write the document atomically (temp sibling + rename)
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TranslationError> {
        FileManager::write_atomic(path, self.emit().as_bytes())
            .map_err(|e| TranslationError::Io(std::io::Error::other(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n\n";
    const ASS: &str = "[Script Info]\nTitle: t\n\n[Events]\nFormat: Layer, Start, End, Style, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,Hello\nDialogue: 0,0:00:03.00,0:00:04.00,Default,World\n";

    #[test]
    fn test_parse_detects_format() {
        assert_eq!(SubtitleDocument::parse(SRT).unwrap().format(), SubtitleFormat::Srt);
        assert_eq!(SubtitleDocument::parse(ASS).unwrap().format(), SubtitleFormat::Ass);
    }

    #[test]
    fn test_cues_have_stable_positions_across_formats() {
        for content in [SRT, ASS] {
            let doc = SubtitleDocument::parse(content).unwrap();
            let cues = doc.cues();
            assert_eq!(cues.len(), 2);
            assert_eq!(cues[0].position, 0);
            assert_eq!(cues[0].text, "Hello");
            assert_eq!(cues[1].position, 1);
            assert_eq!(cues[1].text, "World");
        }
    }

    #[test]
    fn test_set_cue_text_addresses_by_position() {
        for content in [SRT, ASS] {
            let mut doc = SubtitleDocument::parse(content).unwrap();
            doc.set_cue_text(1, "Lume".into());
            assert_eq!(doc.cues()[1].text, "Lume");
            assert_eq!(doc.cues()[0].text, "Hello");
        }
    }

    #[test]
    fn test_set_cue_end_clamps_timing() {
        for content in [SRT, ASS] {
            let mut doc = SubtitleDocument::parse(content).unwrap();
            doc.set_cue_end(0, 1500);
            assert_eq!(doc.cues()[0].end_ms, 1500);
        }
    }

    #[test]
    fn test_insert_note_cue_lands_before_first_cue() {
        for content in [SRT, ASS] {
            let mut doc = SubtitleDocument::parse(content).unwrap();
            doc.insert_note_cue("Machine translated".into());
            let cues = doc.cues();
            assert_eq!(cues.len(), 3);
            assert_eq!(cues[0].text, "Machine translated");
            assert_eq!(cues[0].start_ms, 0);
            assert!(cues[0].end_ms <= cues[1].start_ms);
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SubtitleFormat::from_extension("SRT"), Some(SubtitleFormat::Srt));
        assert_eq!(SubtitleFormat::from_extension("ssa"), Some(SubtitleFormat::Ass));
        assert_eq!(SubtitleFormat::from_extension("sub"), None);
    }
}
