use anyhow::{anyhow, Context, Result};

/// A single timed subtitle entry.
///
/// `position` is the cue's index within the file and is the identifier used
/// throughout batching, fallback and repair; it never changes once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// Zero-based index of the cue in its file
    pub position: usize,
    /// Sequence number as read from the file (SRT), or position + 1
    pub seq_num: usize,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds
    pub end_ms: u64,
    /// Text payload; logical line breaks are `\n`
    pub text: String,
}

impl Cue {
    /// Create a new cue
    pub fn new(position: usize, start_ms: u64, end_ms: u64, text: String) -> Self {
        Cue {
            position,
            seq_num: position + 1,
            start_ms,
            end_ms,
            text,
        }
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Format a millisecond timestamp as SRT `HH:MM:SS,mmm`
    pub fn format_srt_timestamp(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
    }

    /// Parse an SRT timestamp (`HH:MM:SS,mmm`, `.` tolerated) to milliseconds
    pub fn parse_srt_timestamp(timestamp: &str) -> Result<u64> {
        let parts: Vec<&str> = timestamp
            .trim()
            .split(|c| c == ':' || c == ',' || c == '.')
            .collect();

        if parts.len() != 4 {
            return Err(anyhow!("Invalid timestamp format: {}", timestamp));
        }

        let hours: u64 = parts[0].parse().context("Failed to parse hours")?;
        let minutes: u64 = parts[1].parse().context("Failed to parse minutes")?;
        let seconds: u64 = parts[2].parse().context("Failed to parse seconds")?;
        let millis: u64 = parts[3].parse().context("Failed to parse milliseconds")?;

        if minutes >= 60 || seconds >= 60 || millis >= 1000 {
            return Err(anyhow!("Invalid time components in timestamp: {}", timestamp));
        }

        Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
    }

    /// Format a millisecond timestamp as ASS `H:MM:SS.cc` (centiseconds)
    pub fn format_ass_timestamp(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let centis = (ms % 1_000) / 10;

        format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
    }

    /// Parse an ASS timestamp (`H:MM:SS.cc`) to milliseconds
    pub fn parse_ass_timestamp(timestamp: &str) -> Result<u64> {
        let parts: Vec<&str> = timestamp.trim().split(|c| c == ':' || c == '.').collect();

        if parts.len() != 4 {
            return Err(anyhow!("Invalid ASS timestamp format: {}", timestamp));
        }

        let hours: u64 = parts[0].parse().context("Failed to parse hours")?;
        let minutes: u64 = parts[1].parse().context("Failed to parse minutes")?;
        let seconds: u64 = parts[2].parse().context("Failed to parse seconds")?;
        let centis: u64 = parts[3].parse().context("Failed to parse centiseconds")?;

        if minutes >= 60 || seconds >= 60 || centis >= 100 {
            return Err(anyhow!("Invalid time components in timestamp: {}", timestamp));
        }

        Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + centis * 10)
    }
}
