//! # Note File Codec
//!
//! Every indexed note file is a metadata header followed by the raw body:
//!
//! ```text
//! ---
//! identity: 6f1c...
//! title: My Note
//! tags: [home, "a,b"]
//! created: 2024-03-09T14:05:00.000Z
//! modified: 2024-03-09T14:05:00.000Z
//! progress: 0.5
//! status: draft
//! path: Projects/My Note.md
//! ---
//!
//! Body text, verbatim.
//! ```
//!
//! The header is a flat `key: value` subset of YAML, not YAML. Only the keys
//! listed in [`KEYS`] are understood; anything else is skipped so newer files stay
//! readable by older builds. `id` is read as an alias of `identity`.
//!
//! ## Round Trip
//!
//! `parse(&serialize(m, b))` returns `(m, b)` for any valid metadata, up to the
//! millisecond precision of the timestamp format.
//!
//! ## Failure
//!
//! [`parse`] only fails on structure (no delimiters) or missing identity/title.
//! On failure the caller owns the fallback: the whole text, delimiters included,
//! is treated as body.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use crate::model::NoteMetadata;

pub const DELIMITER: &str = "---";

/// Recognized header keys in canonical order.
pub const KEYS: [&str; 12] = [
    "identity",
    "title",
    "tags",
    "created",
    "modified",
    "progress",
    "status",
    "path",
    "word_count",
    "char_count",
    "content_hash",
    "excerpt",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Formats tried in order; the first successful parse wins.
const DATE_FORMATS: [DateFormat; 3] = [
    DateFormat::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    DateFormat::DateTime("%Y-%m-%dT%H:%M:%S"),
    DateFormat::Date("%Y-%m-%d"),
];

enum DateFormat {
    DateTime(&'static str),
    Date(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("text does not start with a header delimiter")]
    MissingOpenDelimiter,
    #[error("header is never closed")]
    MissingCloseDelimiter,
    #[error("header has no `{0}` field")]
    MissingField(&'static str),
}

/// Splits `text` into header metadata and body.
pub fn parse(text: &str) -> Result<(NoteMetadata, String), ParseError> {
    let (header, body) = split_header(text)?;

    let mut id = None;
    let mut title = None;
    let mut tags: BTreeSet<String> = BTreeSet::new();
    let mut created = None;
    let mut modified = None;
    let mut progress = 0.0;
    let mut status = String::new();
    let mut path = None;
    let mut word_count = None;
    let mut char_count = None;
    let mut content_hash = None;
    let mut excerpt = None;

    for line in header.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once(':') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim() {
            "identity" | "id" => id = Some(unquote(raw)),
            "title" => title = Some(unquote(raw)),
            "tags" => tags = parse_list(raw).into_iter().collect(),
            "created" => created = parse_date(&unquote(raw)),
            "modified" => modified = parse_date(&unquote(raw)),
            "progress" => progress = unquote(raw).parse::<f64>().unwrap_or(0.0),
            "status" => status = unquote(raw),
            "path" => path = non_empty(unquote(raw)),
            "word_count" => word_count = unquote(raw).parse::<usize>().ok(),
            "char_count" => char_count = unquote(raw).parse::<usize>().ok(),
            "content_hash" => content_hash = non_empty(unquote(raw)),
            "excerpt" => excerpt = Some(unquote(raw)),
            _ => {}
        }
    }

    let id = id
        .filter(|v| !v.trim().is_empty())
        .ok_or(ParseError::MissingField("identity"))?;
    let title = title
        .filter(|v| !v.trim().is_empty())
        .ok_or(ParseError::MissingField("title"))?;

    let (created, modified) = match (created, modified) {
        (Some(c), Some(m)) => (c, m),
        (Some(c), None) => (c, c),
        (None, Some(m)) => (m, m),
        (None, None) => {
            let now = Utc::now();
            (now, now)
        }
    };

    let metadata = NoteMetadata {
        id,
        title,
        tags,
        created,
        modified,
        progress: crate::model::clamp_progress(progress),
        status,
        path,
        word_count,
        char_count,
        content_hash,
        excerpt,
    };
    Ok((metadata, body.to_string()))
}

/// Renders metadata and body into the on-disk text format.
pub fn serialize(metadata: &NoteMetadata, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 256);
    out.push_str(DELIMITER);
    out.push('\n');

    push_field(&mut out, "identity", &format_string(&metadata.id));
    push_field(&mut out, "title", &format_string(&metadata.title));
    let tags: Vec<String> = metadata.tags.iter().map(|t| format_string(t)).collect();
    push_field(&mut out, "tags", &format!("[{}]", tags.join(", ")));
    push_field(&mut out, "created", &format_date(&metadata.created));
    push_field(&mut out, "modified", &format_date(&metadata.modified));
    push_field(&mut out, "progress", &metadata.progress.to_string());
    push_field(&mut out, "status", &format_string(&metadata.status));

    if let Some(path) = &metadata.path {
        push_field(&mut out, "path", &format_string(path));
    }
    if let Some(count) = metadata.word_count {
        push_field(&mut out, "word_count", &count.to_string());
    }
    if let Some(count) = metadata.char_count {
        push_field(&mut out, "char_count", &count.to_string());
    }
    if let Some(hash) = &metadata.content_hash {
        push_field(&mut out, "content_hash", &format_string(hash));
    }
    if let Some(excerpt) = &metadata.excerpt {
        push_field(&mut out, "excerpt", &format_string(excerpt));
    }

    out.push_str(DELIMITER);
    out.push_str("\n\n");
    out.push_str(body);
    out
}

/// Returns `(header, body)` slices. The blank line after the closing delimiter
/// belongs to the format, not the body.
fn split_header(text: &str) -> Result<(&str, &str), ParseError> {
    let first_end = text.find('\n').unwrap_or(text.len());
    if text[..first_end].trim_end() != DELIMITER {
        return Err(ParseError::MissingOpenDelimiter);
    }
    if first_end == text.len() {
        return Err(ParseError::MissingCloseDelimiter);
    }

    let header_start = first_end + 1;
    let mut offset = header_start;
    while offset <= text.len() {
        let line_end = text[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(text.len());
        if text[offset..line_end].trim_end() == DELIMITER {
            let header = &text[header_start..offset];
            let mut rest = if line_end < text.len() {
                &text[line_end + 1..]
            } else {
                ""
            };
            if let Some(stripped) = rest.strip_prefix("\r\n") {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('\n') {
                rest = stripped;
            }
            return Ok((header, rest));
        }
        if line_end == text.len() {
            break;
        }
        offset = line_end + 1;
    }
    Err(ParseError::MissingCloseDelimiter)
}

fn push_field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn needs_quotes(value: &str) -> bool {
    value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value
            .chars()
            .any(|c| matches!(c, ':' | '#' | '[' | ']' | ',' | '"' | '\'' | '\\' | '\n' | '\r'))
}

fn format_string(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format(TIMESTAMP_FORMAT).to_string()
}

/// Strips one level of matching quotes, resolving escapes.
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        return out;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].replace("''", "'");
    }
    raw.to_string()
}

/// Parses `[a, "b, c", d]`. A bare value is a one-element list.
fn parse_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
        let single = unquote(raw);
        return if single.is_empty() { Vec::new() } else { vec![single] };
    };

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in inner.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match quote {
            Some(q) => {
                if c == '\\' && q == '"' {
                    escaped = true;
                }
                if c == q && !escaped {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    items.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| unquote(item))
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim().trim_end_matches('Z');
    DATE_FORMATS.iter().find_map(|format| match format {
        DateFormat::DateTime(fmt) => NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .map(|naive| naive.and_utc()),
        DateFormat::Date(fmt) => NaiveDate::parse_from_str(value, fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn sample_metadata() -> NoteMetadata {
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let mut meta = NoteMetadata::new("note-1", "My Note");
        meta.created = created;
        meta.modified = created + chrono::Duration::minutes(3);
        meta.set_tags(["home", "work"]);
        meta.progress = 0.5;
        meta.status = "draft".to_string();
        meta
    }

    #[test]
    fn test_serialize_canonical_order() {
        let text = serialize(&sample_metadata(), "Hello world");
        let expected = "---\n\
                        identity: note-1\n\
                        title: My Note\n\
                        tags: [home, work]\n\
                        created: 2024-03-09T14:05:00.000Z\n\
                        modified: 2024-03-09T14:08:00.000Z\n\
                        progress: 0.5\n\
                        status: draft\n\
                        ---\n\
                        \n\
                        Hello world";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_serialize_always_writes_tags_line() {
        let mut meta = sample_metadata();
        meta.tags.clear();
        let text = serialize(&meta, "");
        assert!(text.contains("\ntags: []\n"));
    }

    #[test]
    fn test_round_trip_with_optional_fields() {
        let mut meta = sample_metadata();
        meta.path = Some("Projects/My Note.md".to_string());
        meta.refresh_derived("Hello world");
        let body = "Hello world";

        let (parsed, parsed_body) = parse(&serialize(&meta, body)).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn test_round_trip_quotes_significant_characters() {
        let mut meta = sample_metadata();
        meta.title = "Re: [draft] #1, \"final\" \\ v2".to_string();
        meta.status = "  padded ".to_string();
        meta.set_tags(["a,b", "c:d", "plain"]);
        meta.excerpt = Some("line one\nline two".to_string());
        let body = "\n---\nbody with its own delimiter\n";

        let text = serialize(&meta, body);
        let (parsed, parsed_body) = parse(&text).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn test_round_trip_rounds_sub_millisecond_timestamps() {
        let mut meta = sample_metadata();
        meta.created = meta.created.with_nanosecond(123_456_789).unwrap();
        meta.modified = meta.created;

        let (parsed, _) = parse(&serialize(&meta, "x")).unwrap();
        assert_eq!(parsed.created.nanosecond(), 123_000_000);
        assert_eq!(parsed.created.timestamp(), meta.created.timestamp());
    }

    #[test]
    fn test_parse_requires_open_delimiter() {
        assert_eq!(
            parse("title: x\n---\n").unwrap_err(),
            ParseError::MissingOpenDelimiter
        );
    }

    #[test]
    fn test_parse_requires_close_delimiter() {
        assert_eq!(
            parse("---\nid: a\ntitle: b\n").unwrap_err(),
            ParseError::MissingCloseDelimiter
        );
    }

    #[test]
    fn test_parse_rejects_missing_title() {
        let text = "---\nid: abc\ntags: []\n---\n\nbody";
        assert_eq!(parse(text).unwrap_err(), ParseError::MissingField("title"));
    }

    #[test]
    fn test_parse_rejects_missing_id() {
        let text = "---\ntitle: T\n---\n\nbody";
        assert_eq!(parse(text).unwrap_err(), ParseError::MissingField("identity"));
    }

    #[test]
    fn test_parse_accepts_identity_and_id_keys() {
        let canonical = "---\nidentity: n-7\ntitle: T\n---\n\nbody";
        let (meta, body) = parse(canonical).unwrap();
        assert_eq!(meta.id, "n-7");
        assert_eq!(body, "body");

        let short = "---\nid: n-8\ntitle: T\n---\n\nbody";
        assert_eq!(parse(short).unwrap().0.id, "n-8");
    }

    #[test]
    fn test_parse_ignores_unknown_keys_and_comments() {
        let text = "---\n# comment\nid: a\ncolor: blue\ntitle: 'It''s here'\n---\n\nbody";
        let (meta, body) = parse(text).unwrap();
        assert_eq!(meta.title, "It's here");
        assert_eq!(body, "body");
    }

    #[test]
    fn test_parse_date_formats_in_order() {
        let with_fraction = parse_date("2024-03-09T14:05:00.250Z").unwrap();
        assert_eq!(with_fraction.nanosecond(), 250_000_000);

        let without_fraction = parse_date("2024-03-09T14:05:00").unwrap();
        assert_eq!(
            without_fraction,
            Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
        );

        let date_only = parse_date("2024-03-09").unwrap();
        assert_eq!(date_only, Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());

        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_parse_missing_modified_defaults_to_created() {
        let text = "---\nid: a\ntitle: b\ncreated: 2024-01-02\n---\n\n";
        let (meta, body) = parse(text).unwrap();
        assert_eq!(meta.modified, meta.created);
        assert_eq!(body, "");
    }

    #[test]
    fn test_parse_list_variants() {
        assert_eq!(parse_list("[]"), Vec::<String>::new());
        assert_eq!(parse_list("[a, b ,c]"), vec!["a", "b", "c"]);
        assert_eq!(parse_list("[\"x, y\", 'z']"), vec!["x, y", "z"]);
        assert_eq!(parse_list("solo"), vec!["solo"]);
    }

    #[test]
    fn test_parse_clamps_progress() {
        let text = "---\nid: a\ntitle: b\nprogress: 4\n---\n\n";
        let (meta, _) = parse(text).unwrap();
        assert_eq!(meta.progress, 1.0);
    }

    #[test]
    fn test_parse_accepts_crlf_files() {
        let text = "---\r\nid: a\r\ntitle: b\r\n---\r\n\r\nbody";
        let (meta, body) = parse(text).unwrap();
        assert_eq!(meta.id, "a");
        assert_eq!(meta.title, "b");
        assert_eq!(body, "body");
    }
}
