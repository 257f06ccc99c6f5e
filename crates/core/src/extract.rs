use crate::models::{RelevanceJudgment, RowId};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::sync::LazyLock;
use tracing::warn;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*?)```").expect("fenced block pattern is valid"));

/// Result of pulling structured data out of free-form model text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    Parsed(Vec<T>),
    ParseFailure { raw: String, reason: String },
}

impl<T> Extraction<T> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ParseFailure { .. })
    }

    pub fn into_parsed(self) -> Option<Vec<T>> {
        match self {
            Self::Parsed(items) => Some(items),
            Self::ParseFailure { .. } => None,
        }
    }
}

/// An entry of the final ranking reply before it is checked against the
/// corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub row_id: RowId,
    pub certainty: f64,
    pub title: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(alias = "id", alias = "row_id")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    database_index: u64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    certainty: f64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RawRankedEntry {
    #[serde(alias = "id", alias = "row_id")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    database_index: u64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    certainty: f64,
    #[serde(default, alias = "Title")]
    title: Option<String>,
}

/// Finds a JSON array in `text`. Candidates come from each fenced code
/// block, then every balanced `[...]` span, then the whole text. The first
/// candidate holding an object wins; a bare list like `[4, 7]` in a reasoning
/// preamble is only used when nothing better exists.
pub fn extract_json_array(text: &str) -> Extraction<Value> {
    let mut candidates = Vec::new();
    for capture in FENCED_BLOCK.captures_iter(text) {
        let body = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
        let body = strip_language_tag(body);
        match parse_array_value(body) {
            Some(items) => candidates.push(items),
            None => candidates.extend(array_spans(body)),
        }
    }
    candidates.extend(array_spans(text));
    candidates.extend(parse_array_value(text.trim()));

    if !candidates.is_empty() {
        let chosen = candidates
            .iter()
            .position(|items| items.iter().any(Value::is_object))
            .unwrap_or(0);
        return Extraction::Parsed(candidates.swap_remove(chosen));
    }

    let reason = if FENCED_BLOCK.is_match(text) {
        "fenced block did not contain a JSON array"
    } else if text.contains("```") {
        "unterminated code fence without a JSON array"
    } else {
        "no fenced code block or JSON array found"
    };

    Extraction::ParseFailure {
        raw: text.to_string(),
        reason: reason.to_string(),
    }
}

pub fn parse_judgments(text: &str) -> Extraction<RelevanceJudgment> {
    decode_reply::<RawJudgment, _>(text, "judgment", |raw| {
        valid_certainty(raw.database_index, raw.certainty).map(|certainty| RelevanceJudgment {
            row_id: raw.database_index,
            certainty,
        })
    })
}

pub fn parse_ranked(text: &str) -> Extraction<RankedEntry> {
    decode_reply::<RawRankedEntry, _>(text, "ranked entry", |raw| {
        valid_certainty(raw.database_index, raw.certainty).map(|certainty| RankedEntry {
            row_id: raw.database_index,
            certainty,
            title: raw
                .title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty()),
        })
    })
}

/// A non-empty array with no usable item is a failure; `[]` is a valid
/// "nothing relevant" answer.
fn decode_reply<R: DeserializeOwned, T>(
    text: &str,
    kind: &str,
    convert: impl FnMut(R) -> Option<T>,
) -> Extraction<T> {
    let items = match extract_json_array(text) {
        Extraction::Parsed(items) => items,
        Extraction::ParseFailure { raw, reason } => {
            return Extraction::ParseFailure { raw, reason };
        }
    };

    let offered = items.len();
    let decoded: Vec<T> = decode_items::<R>(items, kind)
        .into_iter()
        .filter_map(convert)
        .collect();
    if offered > 0 && decoded.is_empty() {
        return Extraction::ParseFailure {
            raw: text.to_string(),
            reason: format!("no {kind} matched the expected shape"),
        };
    }
    Extraction::Parsed(decoded)
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(position, item)| match serde_json::from_value::<T>(item) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(position, kind, %error, "skipping malformed item in model output");
                None
            }
        })
        .collect()
}

fn valid_certainty(row_id: RowId, certainty: f64) -> Option<f64> {
    if certainty.is_finite() && (0.0..=1.0).contains(&certainty) {
        Some(certainty)
    } else {
        warn!(row_id, certainty, "skipping item with certainty outside [0, 1]");
        None
    }
}

fn strip_language_tag(body: &str) -> &str {
    let trimmed = body.trim_start();
    let tag_len = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(trimmed.len());
    trimmed[tag_len..].trim()
}

fn parse_array_value(text: &str) -> Option<Vec<Value>> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(into_items)
}

/// Arrays pass through. An object wrapping a single array is unwrapped, and a
/// bare item object becomes a one-element list.
fn into_items(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            if map.contains_key("database_index") {
                return Some(vec![Value::Object(map)]);
            }
            let mut arrays = map.into_iter().filter_map(|(_, value)| match value {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Every balanced `[...]` span that parses as an array, left to right.
/// Nested arrays are not reported separately.
fn array_spans(text: &str) -> Vec<Vec<Value>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('[') {
        let start = cursor + offset;
        let parsed = balanced_end(&text[start..]).and_then(|end| {
            match serde_json::from_str::<Value>(&text[start..start + end]) {
                Ok(Value::Array(items)) => Some((items, end)),
                _ => None,
            }
        });
        match parsed {
            Some((items, end)) => {
                found.push(items);
                cursor = start + end;
            }
            None => cursor = start + 1,
        }
    }
    found
}

/// Byte length of the bracketed span opening at the start of `text`, skipping
/// brackets inside JSON strings.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}
