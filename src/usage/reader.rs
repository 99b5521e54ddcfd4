//! JSONL file reading and parsing

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use uuid::Uuid;

use crate::usage::error::Result;
use crate::usage::models::{
    SessionEvent, TokenCounts, UsageEvent, ASSISTANT_MESSAGE_TYPE, PLACEHOLDER_MODEL,
};
use crate::usage::pricing::PricingCalculator;

/// Why a line was not turned into an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRejection {
    InvalidJson,
    NotAssistant,
    MissingUsage,
    InvalidTimestamp,
    NoTokens,
    /// Token counts whose sum does not fit in a `u64`
    TokenOverflow,
    Duplicate,
}

/// Parse ISO 8601 timestamps that carry fractional seconds and an offset
///
/// `2025-01-01T10:00:00.123Z` parses, `2025-01-01T10:00:00Z` does not.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    // "YYYY-MM-DDTHH:MM:SS" is 19 bytes; a fraction must follow
    if ts.as_bytes().get(19) != Some(&b'.') {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Get deduplication key for an event
/// Only records carrying both a message id and a request id are deduplicated
fn get_dedup_key(event: &SessionEvent) -> Option<String> {
    let message_id = event.message.as_ref().and_then(|m| m.id.as_deref())?;
    let request_id = event.request_id.as_deref()?;
    Some(format!("{}:{}", message_id, request_id))
}

/// Split a buffer into non-empty newline-delimited byte ranges
pub fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes.split(|b| *b == b'\n').filter(|line| !line.is_empty())
}

/// Turn one raw line into an event
///
/// `dedup` is consulted and updated only for lines that pass every other
/// check, so a rejected line never reserves a key.
pub fn parse_line(
    line: &[u8],
    source_path: &Path,
    project_name: &str,
    dedup: &mut HashSet<String>,
    pricing: &PricingCalculator,
) -> std::result::Result<UsageEvent, LineRejection> {
    let event: SessionEvent =
        serde_json::from_slice(line).map_err(|_| LineRejection::InvalidJson)?;

    if event.event_type.as_deref() != Some(ASSISTANT_MESSAGE_TYPE) {
        return Err(LineRejection::NotAssistant);
    }

    let message = event.message.as_ref().ok_or(LineRejection::MissingUsage)?;
    let usage = message.usage.as_ref().ok_or(LineRejection::MissingUsage)?;
    let model = message
        .model
        .clone()
        .unwrap_or_else(|| PLACEHOLDER_MODEL.to_string());

    let timestamp = event
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(LineRejection::InvalidTimestamp)?;

    let tokens = TokenCounts::from(usage);
    match tokens.checked_total() {
        None => return Err(LineRejection::TokenOverflow),
        Some(0) => return Err(LineRejection::NoTokens),
        Some(_) => {}
    }

    let dedup_key = get_dedup_key(&event);
    if let Some(key) = &dedup_key {
        if !dedup.insert(key.clone()) {
            return Err(LineRejection::Duplicate);
        }
    }

    let cost_usd = event.cost.unwrap_or_else(|| pricing.cost(&tokens, &model));
    let entry_id =
        dedup_key.unwrap_or_else(|| format!("{}-{}", timestamp.to_rfc3339(), Uuid::new_v4()));

    Ok(UsageEvent {
        timestamp,
        model,
        tokens,
        cost_usd,
        source_path: source_path.to_path_buf(),
        project: project_name.to_string(),
        session_id: event.session_id,
        message_id: message.id.clone(),
        request_id: event.request_id,
        entry_id,
    })
}

/// Parse every line of a buffer, skipping lines that are not usage records
pub fn parse_bytes(
    bytes: &[u8],
    source_path: &Path,
    project_name: &str,
    dedup: &mut HashSet<String>,
    pricing: &PricingCalculator,
) -> Vec<UsageEvent> {
    let mut events = Vec::new();

    for (line_num, line) in split_lines(bytes).enumerate() {
        match parse_line(line, source_path, project_name, dedup, pricing) {
            Ok(event) => events.push(event),
            Err(reason) => {
                trace!("Skipping line {} in {:?}: {:?}", line_num, source_path, reason);
            }
        }
    }

    events
}

/// Read all usage events from a JSONL file
///
/// `dedup` is an output parameter: keys of accepted records are added to it,
/// and records whose key is already present are dropped. Pass a fresh set for
/// per-file deduplication or share one across files for a wider scope.
pub fn parse_file(
    path: &Path,
    project_name: &str,
    dedup: &mut HashSet<String>,
    pricing: &PricingCalculator,
) -> Result<Vec<UsageEvent>> {
    let bytes = fs::read(path)?;
    let events = parse_bytes(&bytes, path, project_name, dedup, pricing);
    debug!("Parsed {} usage events from {:?}", events.len(), path);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn assistant_line(message_id: &str, request_id: &str, input: u64, output: u64) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","requestId":"{}","sessionId":"s1","message":{{"id":"{}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{},"output_tokens":{}}}}}}}"#,
            request_id, message_id, input, output
        )
    }

    fn parse(contents: &str) -> Vec<UsageEvent> {
        let mut dedup = HashSet::new();
        parse_bytes(
            contents.as_bytes(),
            Path::new("test.jsonl"),
            "proj",
            &mut dedup,
            &PricingCalculator::new(),
        )
    }

    #[test]
    fn test_overflowing_token_counts_skip_line() {
        let huge = assistant_line("m1", "r1", u64::MAX, 1);
        let mut dedup = HashSet::new();
        let rejection = parse_line(
            huge.as_bytes(),
            Path::new("test.jsonl"),
            "proj",
            &mut dedup,
            &PricingCalculator::new(),
        )
        .unwrap_err();
        assert_eq!(rejection, LineRejection::TokenOverflow);
        assert!(dedup.is_empty());

        let contents = format!("{}\n{}\n", huge, assistant_line("m1", "r1", 10, 5));
        let events = parse(&contents);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].total_tokens(), 15);
    }

    #[test]
    fn test_parse_timestamp_requires_fraction() {
        assert!(parse_timestamp("2025-03-01T10:00:00.123Z").is_some());
        assert!(parse_timestamp("2025-03-01T10:00:00.5+02:00").is_some());
        assert!(parse_timestamp("2025-03-01T10:00:00Z").is_none());
        assert!(parse_timestamp("2025-03-01 10:00:00.000").is_none());
        assert!(parse_timestamp("garbage").is_none());
    }

    #[test]
    fn test_parse_timestamp_applies_offset() {
        let ts = parse_timestamp("2025-03-01T12:00:00.000+02:00").unwrap();
        assert_eq!(ts, parse_timestamp("2025-03-01T10:00:00.000Z").unwrap());
    }

    #[test]
    fn test_split_lines_keeps_trailing_fragment() {
        let lines: Vec<_> = split_lines(b"a\n\nb\nc").collect();
        assert_eq!(lines, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_duplicate_ids_yield_one_event() {
        let line = assistant_line("m1", "r1", 100, 50);
        let events = parse(&format!("{}\n{}\n", line, line));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entry_id, "m1:r1");
    }

    #[test]
    fn test_dedup_set_spans_calls() {
        let pricing = PricingCalculator::new();
        let mut dedup = HashSet::new();
        let line = assistant_line("m1", "r1", 100, 50);
        let first = parse_bytes(line.as_bytes(), Path::new("a.jsonl"), "p", &mut dedup, &pricing);
        let second = parse_bytes(line.as_bytes(), Path::new("b.jsonl"), "p", &mut dedup, &pricing);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(dedup.contains("m1:r1"));
    }

    #[test]
    fn test_records_without_ids_are_never_deduplicated() {
        let line = r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","message":{"model":"claude-3-haiku","usage":{"input_tokens":10}}}"#;
        let events = parse(&format!("{}\n{}", line, line));
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].entry_id, events[1].entry_id);
        assert!(events[0].entry_id.starts_with("2025-03-01T10:00:00"));
    }

    #[test]
    fn test_invalid_lines_are_skipped() {
        let good = assistant_line("m1", "r1", 100, 50);
        let contents = [
            "not json",
            r#"{"type":"user","timestamp":"2025-03-01T10:00:00.000Z","message":{"usage":{"input_tokens":5}}}"#,
            r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","message":{"model":"x"}}"#,
            r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00Z","message":{"usage":{"input_tokens":5}}}"#,
            r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","message":{"usage":{"input_tokens":0}}}"#,
            good.as_str(),
        ]
        .join("\n");
        let events = parse(&contents);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tokens, TokenCounts::new(100, 50, 0, 0));
    }

    #[test]
    fn test_rejection_reasons() {
        let pricing = PricingCalculator::new();
        let mut dedup = HashSet::new();
        let mut check = |line: &str| parse_line(line.as_bytes(), Path::new("f"), "p", &mut dedup, &pricing);

        assert_eq!(check("{").unwrap_err(), LineRejection::InvalidJson);
        assert_eq!(check(r#"{"type":"summary"}"#).unwrap_err(), LineRejection::NotAssistant);
        assert_eq!(check(r#"{"type":"assistant"}"#).unwrap_err(), LineRejection::MissingUsage);
        assert_eq!(
            check(r#"{"type":"assistant","message":{"usage":{"input_tokens":1}}}"#).unwrap_err(),
            LineRejection::InvalidTimestamp
        );
    }

    #[test]
    fn test_missing_model_uses_placeholder() {
        let line = r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","message":{"usage":{"input_tokens":1000000}}}"#;
        let events = parse(line);
        assert_eq!(events[0].model, PLACEHOLDER_MODEL);
        assert!((events[0].cost_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_cost_overrides_pricing() {
        let line = r#"{"type":"assistant","timestamp":"2025-03-01T10:00:00.000Z","costUSD":1.25,"message":{"model":"claude-3-opus","usage":{"input_tokens":10}}}"#;
        let events = parse(line);
        assert_eq!(events[0].cost_usd, 1.25);
    }

    #[test]
    fn test_event_carries_ids_and_project() {
        let events = parse(&assistant_line("m9", "r9", 1, 1));
        let event = &events[0];
        assert_eq!(event.project, "proj");
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.message_id.as_deref(), Some("m9"));
        assert_eq!(event.request_id.as_deref(), Some("r9"));
        assert_eq!(event.source_path, Path::new("test.jsonl"));
    }

    #[test]
    fn test_parse_file_twice_with_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let line = assistant_line("m1", "r1", 10, 10);
        writeln!(file, "{}", line).unwrap();
        write!(file, "{}", line).unwrap();

        let pricing = PricingCalculator::new();
        for _ in 0..2 {
            let mut dedup = HashSet::new();
            let events = parse_file(file.path(), "p", &mut dedup, &pricing).unwrap();
            assert_eq!(events.len(), 1);
        }
    }

    #[test]
    fn test_parse_file_missing() {
        let mut dedup = HashSet::new();
        let result = parse_file(
            Path::new("/definitely/not/here.jsonl"),
            "p",
            &mut dedup,
            &PricingCalculator::new(),
        );
        assert!(result.is_err());
    }
}
