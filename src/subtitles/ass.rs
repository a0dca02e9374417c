/*!
 * ASS/SSA subtitle parsing and emission.
 *
 * The header (everything up to and including the `[Events]` Format line) is
 * kept verbatim, and event lines keep their original field text, so a file
 * whose dialogue text was never modified round-trips byte-identically.
 */

use crate::errors::TranslationError;
use super::cue::Cue;

/// Kind of a line in the `[Events]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A rendered dialogue line; these are the translatable cues
    Dialogue,
    /// A muted event kept only for round-tripping
    Comment,
    /// Any other line in the section, passed through verbatim
    Raw,
}

/// One line of the `[Events]` section
#[derive(Debug, Clone)]
pub struct AssEvent {
    /// Dialogue, Comment or passthrough
    pub kind: EventKind,
    /// Non-text fields exactly as read (spacing preserved)
    pub fields: Vec<String>,
    /// The Text field
    pub text: String,
    /// Parsed start time (Dialogue only)
    pub start_ms: u64,
    /// Parsed end time (Dialogue only)
    pub end_ms: u64,
    /// Verbatim content for Raw lines, including the line ending
    raw: String,
    /// Line ending of this event as read ("", "\n" or "\r\n")
    ending: String,
}

/// Parsed ASS file
#[derive(Debug, Clone)]
pub struct AssFile {
    /// Verbatim header, up to and including the events Format line
    header: String,
    /// Lines of the events section in order
    pub events: Vec<AssEvent>,
    /// Field index of `Start` in the events format
    start_field: usize,
    /// Field index of `End` in the events format
    end_field: usize,
}

impl AssFile {
    /// Quick content sniff used by the codec dispatcher
    pub fn detect(content: &str) -> bool {
        content.contains("[Script Info]") || content.contains("Dialogue:")
    }

    /// Parse ASS content
    pub fn parse(content: &str) -> Result<Self, TranslationError> {
        let mut header = String::new();
        let mut events = Vec::new();
        let mut in_events = false;
        let mut format: Option<(usize, usize, usize)> = None; // (count, start, end)
        let mut last_start: Option<u64> = None;

        for raw_line in content.split_inclusive('\n') {
            let (line, ending) = split_line_ending(raw_line);

            let format_known = format.is_some();
            if !in_events || !format_known {
                header.push_str(raw_line);

                if line.trim().eq_ignore_ascii_case("[events]") {
                    in_events = true;
                } else if in_events {
                    if let Some(rest) = line.trim().strip_prefix("Format:") {
                        let names: Vec<String> = rest
                            .split(',')
                            .map(|f| f.trim().to_string())
                            .collect();
                        let start = names.iter().position(|n| n == "Start").ok_or_else(|| {
                            TranslationError::MalformedSubtitle(
                                "events format has no Start field".into(),
                            )
                        })?;
                        let end = names.iter().position(|n| n == "End").ok_or_else(|| {
                            TranslationError::MalformedSubtitle(
                                "events format has no End field".into(),
                            )
                        })?;
                        if names.last().map(|n| n.as_str()) != Some("Text") {
                            return Err(TranslationError::MalformedSubtitle(
                                "events format must end with the Text field".into(),
                            ));
                        }
                        format = Some((names.len(), start, end));
                    }
                }
                continue;
            }

            // format is always Some here: the branch above runs until the
            // events Format line was seen
            let Some((field_count, start_field, end_field)) = format else {
                continue;
            };

            let kind = if line.starts_with("Dialogue:") {
                EventKind::Dialogue
            } else if line.starts_with("Comment:") {
                EventKind::Comment
            } else {
                events.push(AssEvent {
                    kind: EventKind::Raw,
                    fields: Vec::new(),
                    text: String::new(),
                    start_ms: 0,
                    end_ms: 0,
                    raw: raw_line.to_string(),
                    ending: String::new(),
                });
                continue;
            };

            let prefix_len = match kind {
                EventKind::Dialogue => "Dialogue:".len(),
                _ => "Comment:".len(),
            };
            let rest = &line[prefix_len..];
            let parts: Vec<&str> = rest.splitn(field_count, ',').collect();
            if parts.len() < field_count {
                return Err(TranslationError::MalformedSubtitle(format!(
                    "truncated event line: {:?}",
                    line
                )));
            }

            let fields: Vec<String> = parts[..field_count - 1]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let text = parts[field_count - 1].to_string();

            let (start_ms, end_ms) = if kind == EventKind::Dialogue {
                let start = Cue::parse_ass_timestamp(&fields[start_field]).map_err(|e| {
                    TranslationError::MalformedSubtitle(format!("bad event start: {}", e))
                })?;
                let end = Cue::parse_ass_timestamp(&fields[end_field]).map_err(|e| {
                    TranslationError::MalformedSubtitle(format!("bad event end: {}", e))
                })?;

                if let Some(previous) = last_start {
                    if start < previous {
                        return Err(TranslationError::MalformedSubtitle(format!(
                            "event starts before its predecessor ({} < {})",
                            start, previous
                        )));
                    }
                }
                last_start = Some(start);
                (start, end)
            } else {
                (0, 0)
            };

            events.push(AssEvent {
                kind,
                fields,
                text,
                start_ms,
                end_ms,
                raw: String::new(),
                ending: ending.to_string(),
            });
        }

        let (_, start_field, end_field) = format.ok_or_else(|| {
            TranslationError::MalformedSubtitle("no [Events] Format line found".into())
        })?;

        Ok(AssFile {
            header,
            events,
            start_field,
            end_field,
        })
    }

    /// Positions (indexes into `events`) of dialogue lines, in order
    pub fn dialogue_indexes(&self) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EventKind::Dialogue)
            .map(|(i, _)| i)
            .collect()
    }

    /// Rewrite the end time of an event; the End field loses its original
    /// spelling, which is intended since the value changed
    pub fn set_event_end(&mut self, event_index: usize, end_ms: u64) {
        if let Some(event) = self.events.get_mut(event_index) {
            if event.kind == EventKind::Dialogue {
                event.end_ms = end_ms;
                event.fields[self.end_field] = Cue::format_ass_timestamp(end_ms);
            }
        }
    }

    /// Insert a dialogue event at the front of the events section,
    /// reusing the field layout of the first existing dialogue line
    pub fn insert_leading_dialogue(&mut self, start_ms: u64, end_ms: u64, text: String) {
        let template = self
            .events
            .iter()
            .find(|e| e.kind == EventKind::Dialogue)
            .cloned();

        let Some(template) = template else {
            return;
        };

        let mut fields = template.fields.clone();
        fields[self.start_field] = Cue::format_ass_timestamp(start_ms);
        fields[self.end_field] = Cue::format_ass_timestamp(end_ms);

        self.events.insert(
            0,
            AssEvent {
                kind: EventKind::Dialogue,
                fields,
                text,
                start_ms,
                end_ms,
                raw: String::new(),
                ending: template.ending.clone(),
            },
        );
    }

    /// Emit the file; untouched parts are byte-identical to the input
    pub fn emit(&self) -> String {
        let mut out = self.header.clone();

        for event in &self.events {
            match event.kind {
                EventKind::Raw => out.push_str(&event.raw),
                EventKind::Dialogue | EventKind::Comment => {
                    let kind = if event.kind == EventKind::Dialogue {
                        "Dialogue:"
                    } else {
                        "Comment:"
                    };
                    out.push_str(kind);
                    out.push_str(&event.fields.join(","));
                    out.push(',');
                    out.push_str(&event.text);
                    out.push_str(&event.ending);
                }
            }
        }

        out
    }
}

/// Split a raw line into its content and its line terminator
fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(stripped) = raw.strip_suffix("\r\n") {
        (stripped, "\r\n")
    } else if let Some(stripped) = raw.strip_suffix('\n') {
        (stripped, "\n")
    } else {
        (raw, "")
    }
}
