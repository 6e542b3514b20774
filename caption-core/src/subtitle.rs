//! SubRip (SRT) codec — pure functions over canonical segments.
//!
//! ```text
//! 1
//! 00:00:00,000 --> 00:00:01,500
//! Hello
//!
//! 2
//! ...
//! ```

use crate::normalize::Segment;

/// Format fractional seconds as a zero-padded `HH:MM:SS,mmm` timecode.
/// Hours are unbounded, not wrapped. Negative or non-finite input clamps
/// to zero.
pub fn format_timecode(seconds: f64) -> String {
    let clamped = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    };
    let total_millis = (clamped * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = total_millis % 3_600_000 / 60_000;
    let secs = total_millis % 60_000 / 1_000;
    let millis = total_millis % 1_000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Serialize segments as SRT text.
///
/// Segments are numbered from 1; only segments with non-empty trimmed text
/// are emitted. Returns `None` when zero segments qualify.
pub fn to_subtitle_text(segments: &[Segment]) -> Option<String> {
    let mut blocks = Vec::new();
    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        blocks.push(format!(
            "{}\n{} --> {}\n{}",
            blocks.len() + 1,
            format_timecode(segment.start),
            format_timecode(segment.end),
            text,
        ));
    }
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n") + "\n")
    }
}

/// Parse SRT text back into segments. Malformed blocks are skipped.
pub fn parse_subtitle_text(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for block in text.trim().split("\n\n") {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            continue;
        }
        // The index line is optional in the wild; the time line is whichever
        // of the first two contains the arrow.
        let (time_line, text_start) = if lines[0].contains("-->") {
            (lines[0], 1)
        } else if lines[1].contains("-->") {
            (lines[1], 2)
        } else {
            continue;
        };
        let Some((start_raw, end_raw)) = time_line.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (
            parse_timecode(start_raw.trim()),
            parse_timecode(end_raw.trim()),
        ) else {
            continue;
        };
        let text = lines[text_start..].join(" ").trim().to_owned();
        if text.is_empty() {
            continue;
        }
        segments.push(Segment { start, end, text });
    }
    segments
}

/// Parse one `HH:MM:SS,mmm` timecode field.
fn parse_timecode(value: &str) -> Option<f64> {
    let normalized = value.replace(',', ":");
    let parts: Vec<&str> = normalized.split(':').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }
    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: u64 = parts[2].parse().ok()?;
    let millis: u64 = parts[3].parse().ok()?;
    Some((hours * 3600 + minutes * 60 + seconds) as f64 + millis as f64 / 1000.0)
}
