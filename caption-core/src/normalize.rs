//! Raw engine result → canonical segment list.
//!
//! The native layer returns structurally ambiguous payloads: a serialized
//! JSON string, a bare array of segment tuples, or an object holding the
//! segment array under one of several historical field names. Discovery is
//! an explicit tagged parse (`ParsedShape`), tried in order:
//!
//! 1. Textual payload → parse as JSON, recurse; unparseable text means
//!    "no timestamps available" (empty list), never an error.
//! 2. Sequence → every element is a segment candidate.
//! 3. Keyed object → probe known field names in order.
//! 4. Scavenge — scan all object values for segment-shaped entries. This is
//!    a compatibility shim for engine builds predating the keyed format,
//!    not a primary path.
//!
//! A candidate becomes a canonical [`Segment`] only when start, end and
//! non-empty text are all present and `start <= end`; anything else is
//! silently dropped (documented lossy behavior).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use zhconv::{zhconv, Variant};

use crate::language::Language;

/// Canonical timestamped span of recognized text. The stable output
/// contract of the whole core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds. Never less than `start`.
    pub end: f64,
    /// Recognized text, trimmed, non-empty.
    pub text: String,
}

/// Known segment-array field names, in probe order.
const SEGMENT_FIELDS: [&str; 3] = ["segments", "result", "transcription"];

/// Accepted keyed spellings for each segment field.
const START_KEYS: [&str; 2] = ["start", "from"];
const END_KEYS: [&str; 2] = ["end", "to"];
const TEXT_KEYS: [&str; 3] = ["text", "text_segment", "content"];

/// Outcome of shape discovery on a raw payload.
#[derive(Debug)]
enum ParsedShape {
    /// Raw payload was already a sequence of segment candidates.
    Sequence(Vec<Value>),
    /// Candidates found under one of `SEGMENT_FIELDS`.
    Keyed(Vec<Value>),
    /// Candidates recovered by the duck-typed value scan (compat shim).
    Scavenged(Vec<Value>),
    /// Nothing segment-like in the payload.
    Empty,
}

/// Normalize a raw engine result into canonical segments.
///
/// Pure over its inputs: the same payload and language always yield the
/// same list. An empty list is the explicit "no timestamps available"
/// signal — distinct from errors, which this function never produces.
pub fn normalize(raw: &Value, language: Language) -> Vec<Segment> {
    let shape = discover(raw);
    let candidates = match shape {
        ParsedShape::Sequence(v) => v,
        ParsedShape::Keyed(v) => v,
        ParsedShape::Scavenged(v) => {
            debug!(candidates = v.len(), "segments recovered via value scan");
            v
        }
        ParsedShape::Empty => return Vec::new(),
    };

    let total = candidates.len();
    let mut segments: Vec<Segment> = candidates.iter().filter_map(segment_from).collect();
    if segments.len() < total {
        debug!(
            dropped = total - segments.len(),
            kept = segments.len(),
            "dropped partial segments"
        );
    }

    if let Some(target) = conversion_target(language) {
        for segment in &mut segments {
            segment.text = zhconv(&segment.text, target);
        }
    }

    segments
}

/// Script-conversion target for the Chinese variants. The simplified
/// variant normalizes whatever the engine emitted (frequently traditional
/// HK forms) to simplified CN; the traditional variant converts to
/// traditional TW forms.
fn conversion_target(language: Language) -> Option<Variant> {
    match language {
        Language::ZhHans => Some(Variant::ZhHans),
        Language::ZhHant => Some(Variant::ZhTW),
        _ => None,
    }
}

fn discover(raw: &Value) -> ParsedShape {
    match raw {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(inner) => discover(&inner),
            // Headerless plain-text output carries no timestamps.
            Err(_) => ParsedShape::Empty,
        },
        Value::Array(items) => ParsedShape::Sequence(items.clone()),
        Value::Object(map) => {
            for field in SEGMENT_FIELDS {
                if let Some(Value::Array(items)) = map.get(field) {
                    return ParsedShape::Keyed(items.clone());
                }
            }
            let scavenged = scavenge(map);
            if scavenged.is_empty() {
                ParsedShape::Empty
            } else {
                ParsedShape::Scavenged(scavenged)
            }
        }
        _ => ParsedShape::Empty,
    }
}

/// Compat shim: find the first array value whose elements look segment-shaped.
fn scavenge(map: &Map<String, Value>) -> Vec<Value> {
    for value in map.values() {
        if let Value::Array(items) = value {
            if items.iter().any(looks_like_segment) {
                return items.clone();
            }
        }
    }
    Vec::new()
}

/// Duck-typing check: has a start-like and a text-like field.
fn looks_like_segment(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    START_KEYS.iter().any(|k| map.contains_key(*k)) && TEXT_KEYS.iter().any(|k| map.contains_key(*k))
}

/// Extract one canonical segment from a positional triple or keyed object.
/// Returns `None` for partial or malformed candidates.
fn segment_from(value: &Value) -> Option<Segment> {
    let (start, end, text) = match value {
        Value::Array(items) if items.len() >= 3 => (
            coerce_time(&items[0])?,
            coerce_time(&items[1])?,
            items[2].as_str()?.trim().to_owned(),
        ),
        Value::Object(map) => {
            let start = coerce_time(first_present(map, &START_KEYS)?)?;
            let end = coerce_time(first_present(map, &END_KEYS)?)?;
            let text = first_present(map, &TEXT_KEYS)?.as_str()?.trim().to_owned();
            (start, end, text)
        }
        _ => return None,
    };

    if text.is_empty() || start > end || !start.is_finite() || !end.is_finite() {
        return None;
    }

    Some(Segment { start, end, text })
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

/// Accept numeric times, plain numeric strings, and clock strings
/// (`HH:MM:SS,mmm`, `MM:SS.mmm`).
fn coerce_time(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_time_string(s),
        _ => None,
    }
}

fn parse_time_string(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    if !cleaned.contains(':') {
        return cleaned.parse::<f64>().ok();
    }
    let parts: Option<Vec<f64>> = cleaned.split(':').map(|p| p.parse::<f64>().ok()).collect();
    match parts?.as_slice() {
        [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
        [m, s] => Some(m * 60.0 + s),
        [s] => Some(*s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_object_with_empty_text_drops_second_segment() {
        let raw = json!({
            "segments": [
                { "start": 0.0, "end": 1.5, "text": "Hello" },
                { "start": 1.5, "end": 3.0, "text": "" },
            ]
        });
        let segments = normalize(&raw, Language::En);
        assert_eq!(
            segments,
            vec![Segment {
                start: 0.0,
                end: 1.5,
                text: "Hello".into()
            }]
        );
    }

    #[test]
    fn unparseable_text_payload_yields_no_segments_not_error() {
        let raw = json!("not json");
        assert!(normalize(&raw, Language::Auto).is_empty());
    }

    #[test]
    fn serialized_string_payload_is_parsed_before_discovery() {
        let raw = json!("{\"segments\":[{\"start\":0.5,\"end\":2.0,\"text\":\"hi\"}]}");
        let segments = normalize(&raw, Language::En);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hi");
    }

    #[test]
    fn bare_sequence_of_positional_triples() {
        let raw = json!([[0.0, 1.0, " one "], ["1.0", "2,5", "two"]]);
        let segments = normalize(&raw, Language::En);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "one");
        assert_eq!(segments[1].start, 1.0);
        assert!((segments[1].end - 2.5).abs() < 1e-9);
    }

    #[test]
    fn alternate_field_spellings_are_accepted() {
        let raw = json!({
            "result": [
                { "from": "00:00:01,500", "to": "00:00:03,000", "content": "alt" },
            ]
        });
        let segments = normalize(&raw, Language::En);
        assert_eq!(segments.len(), 1);
        assert!((segments[0].start - 1.5).abs() < 1e-9);
        assert!((segments[0].end - 3.0).abs() < 1e-9);
        assert_eq!(segments[0].text, "alt");
    }

    #[test]
    fn scavenge_recovers_segment_shaped_array_under_unknown_key() {
        let raw = json!({
            "meta": { "language": "en" },
            "spans": [
                { "start": 0.0, "end": 1.0, "text": "found" },
            ]
        });
        let segments = normalize(&raw, Language::En);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "found");
    }

    #[test]
    fn output_count_equals_complete_candidate_count() {
        let raw = json!({
            "segments": [
                { "start": 0.0, "end": 1.0, "text": "a" },
                { "start": 1.0, "text": "missing end" },
                { "end": 2.0, "text": "missing start" },
                { "start": 2.0, "end": 3.0, "text": "b" },
                { "start": 3.0, "end": 4.0 },
                { "start": 5.0, "end": 4.0, "text": "inverted" },
            ]
        });
        let segments = normalize(&raw, Language::En);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "a");
        assert_eq!(segments[1].text, "b");
    }

    #[test]
    fn normalize_is_idempotent_over_same_input() {
        let raw = json!({
            "transcription": [[0.0, 1.25, "again"], [1.25, 2.0, "and again"]]
        });
        let first = normalize(&raw, Language::En);
        let second = normalize(&raw, Language::En);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn simplified_variant_converts_traditional_output() {
        let raw = json!({
            "segments": [{ "start": 0.0, "end": 1.0, "text": "電腦" }]
        });
        let segments = normalize(&raw, Language::ZhHans);
        assert_eq!(segments[0].text, "电脑");
    }

    #[test]
    fn traditional_variant_converts_simplified_output() {
        let raw = json!({
            "segments": [{ "start": 0.0, "end": 1.0, "text": "电脑" }]
        });
        let segments = normalize(&raw, Language::ZhHant);
        assert_eq!(segments[0].text, "電腦");
    }

    #[test]
    fn conversion_leaves_non_chinese_text_alone() {
        let raw = json!({
            "segments": [{ "start": 0.0, "end": 1.0, "text": "plain ascii" }]
        });
        let segments = normalize(&raw, Language::ZhHans);
        assert_eq!(segments[0].text, "plain ascii");
    }

    #[test]
    fn base_chinese_code_skips_conversion() {
        let raw = json!({
            "segments": [{ "start": 0.0, "end": 1.0, "text": "電腦" }]
        });
        let segments = normalize(&raw, Language::Zh);
        assert_eq!(segments[0].text, "電腦");
    }
}
