use crate::error::CorpusError;
use crate::models::{RowId, SamplingStrategy, TrialRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

const LIST_PREFIX: &str = "__list__";

/// The unified trial table. Read-only once built, so it can be shared across
/// concurrent runs.
#[derive(Debug, Clone)]
pub struct Corpus {
    records: Vec<TrialRecord>,
    positions: HashMap<RowId, usize>,
    fingerprint: String,
}

impl Corpus {
    pub fn new(records: Vec<TrialRecord>) -> Result<Self, CorpusError> {
        let mut positions = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if positions.insert(record.row_id, position).is_some() {
                return Err(CorpusError::DuplicateRowId(record.row_id));
            }
        }

        let fingerprint = fingerprint_records(&records);
        Ok(Self {
            records,
            positions,
            fingerprint,
        })
    }

    /// Loads a `.json` array or a `.jsonl`/`.ndjson` trial table.
    pub fn from_path(path: &Path) -> Result<Self, CorpusError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let contents = fs::read_to_string(path)?;

        match extension.as_str() {
            "json" => Self::from_json_str(&contents),
            "jsonl" | "ndjson" => Self::from_json_lines(&contents),
            other => Err(CorpusError::UnsupportedFormat(format!(
                "{} (extension `{other}`)",
                path.display()
            ))),
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, CorpusError> {
        let raw: Vec<RawTrialRecord> = serde_json::from_str(contents)?;
        Self::from_raw(raw)
    }

    pub fn from_json_lines(contents: &str) -> Result<Self, CorpusError> {
        let mut raw = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<RawTrialRecord>(line).map_err(|error| {
                CorpusError::InvalidRecord {
                    line: index + 1,
                    details: error.to_string(),
                }
            })?;
            raw.push(record);
        }
        Self::from_raw(raw)
    }

    fn from_raw(raw: Vec<RawTrialRecord>) -> Result<Self, CorpusError> {
        let records = raw
            .into_iter()
            .enumerate()
            .map(|(position, record)| record.into_record(position as RowId))
            .collect();
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, row_id: RowId) -> Option<&TrialRecord> {
        self.positions
            .get(&row_id)
            .and_then(|position| self.records.get(*position))
    }

    pub fn contains(&self, row_id: RowId) -> bool {
        self.positions.contains_key(&row_id)
    }

    /// SHA-256 over every record, identifying this snapshot of the table.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn order(&self, strategy: SamplingStrategy, seed: u64) -> OrderedView<'_> {
        let mut rows: Vec<&TrialRecord> = self.records.iter().collect();

        match strategy {
            SamplingStrategy::Recent => {
                rows.sort_by(|left, right| match (left.start_date, right.start_date) {
                    (Some(l), Some(r)) => r.cmp(&l),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
            SamplingStrategy::Sample => {
                let mut rng = StdRng::seed_from_u64(seed);
                rows.shuffle(&mut rng);
            }
            SamplingStrategy::Natural => {}
        }

        OrderedView { rows }
    }

    /// Rows whose identifier is present, in corpus order. Unknown ids are
    /// skipped.
    pub fn lookup(&self, row_ids: &[RowId]) -> Vec<&TrialRecord> {
        let wanted: HashSet<RowId> = row_ids.iter().copied().collect();
        self.records
            .iter()
            .filter(|record| wanted.contains(&record.row_id))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OrderedView<'a> {
    rows: Vec<&'a TrialRecord>,
}

impl<'a> OrderedView<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[&'a TrialRecord] {
        &self.rows
    }

    /// Contiguous slice `[start, start + size)`, truncated at the end of the
    /// view. Past the end the chunk is empty.
    pub fn window(&self, start: usize, size: usize) -> Chunk<'_, 'a> {
        let begin = start.min(self.rows.len());
        let end = start.saturating_add(size).min(self.rows.len());
        Chunk {
            index: if size == 0 { 0 } else { start / size },
            start: begin,
            rows: &self.rows[begin..end],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunk<'v, 'a> {
    pub index: usize,
    pub start: usize,
    pub rows: &'v [&'a TrialRecord],
}

impl Chunk<'_, '_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|record| record.row_id).collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawTrialRecord {
    #[serde(default)]
    row_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_text")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    therapeutic_area: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_list")]
    keywords: Option<Vec<String>>,
    #[serde(default, alias = "inclusion_crt", deserialize_with = "lenient_list")]
    inclusion_criteria: Option<Vec<String>>,
    #[serde(default, alias = "exclusion_crt", deserialize_with = "lenient_list")]
    exclusion_criteria: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_date")]
    start_date: Option<NaiveDate>,
}

impl RawTrialRecord {
    fn into_record(self, position: RowId) -> TrialRecord {
        TrialRecord {
            row_id: self.row_id.unwrap_or(position),
            title: self.title,
            therapeutic_area: self.therapeutic_area,
            keywords: self.keywords,
            inclusion_criteria: self.inclusion_criteria,
            exclusion_criteria: self.exclusion_criteria,
            start_date: self.start_date,
        }
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| value_to_text(&value)))
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| decode_list(&value)))
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::String(text) => parse_date(&text),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|moment| moment.date_naive()),
        _ => None,
    }))
}

fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Accepts a JSON array, a `__list__[...]` encoded string, or a bare string.
pub fn decode_list(value: &Value) -> Option<Vec<String>> {
    let items = match value {
        Value::Null => return None,
        Value::Array(items) => items.iter().filter_map(value_to_text).collect(),
        Value::String(text) => match text.strip_prefix(LIST_PREFIX) {
            Some(encoded) => match serde_json::from_str::<Vec<Value>>(encoded) {
                Ok(items) => items.iter().filter_map(value_to_text).collect(),
                Err(_) => vec![text.clone()],
            },
            None => value_to_text(value).into_iter().collect(),
        },
        other => value_to_text(other).into_iter().collect(),
    };

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Unparseable dates are coerced to `None`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|moment| moment.date_naive())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|moment| moment.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|moment| moment.date())
        })
}

fn fingerprint_records(records: &[TrialRecord]) -> String {
    fn update_list(hasher: &mut Sha256, items: &Option<Vec<String>>) {
        match items {
            Some(items) => {
                hasher.update((items.len() as u64).to_le_bytes());
                for item in items {
                    hasher.update(item.as_bytes());
                    hasher.update([0u8]);
                }
            }
            None => hasher.update([0xffu8]),
        }
    }

    let mut hasher = Sha256::new();
    hasher.update((records.len() as u64).to_le_bytes());
    for record in records {
        hasher.update(record.row_id.to_le_bytes());
        match &record.title {
            Some(title) => hasher.update(title.as_bytes()),
            None => hasher.update([0xffu8]),
        }
        hasher.update([0u8]);
        update_list(&mut hasher, &record.therapeutic_area);
        update_list(&mut hasher, &record.keywords);
        update_list(&mut hasher, &record.inclusion_criteria);
        update_list(&mut hasher, &record.exclusion_criteria);
        match record.start_date {
            Some(date) => hasher.update(date.to_string().as_bytes()),
            None => hasher.update([0xffu8]),
        }
    }
    format!("{:x}", hasher.finalize())
}
