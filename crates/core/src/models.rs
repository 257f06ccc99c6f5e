use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RowId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialRecord {
    pub row_id: RowId,
    pub title: Option<String>,
    pub therapeutic_area: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub inclusion_criteria: Option<Vec<String>>,
    pub exclusion_criteria: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
}

impl TrialRecord {
    pub fn new(row_id: RowId, title: impl Into<String>) -> Self {
        Self {
            row_id,
            title: Some(title.into()),
            therapeutic_area: None,
            keywords: None,
            inclusion_criteria: None,
            exclusion_criteria: None,
            start_date: None,
        }
    }
}

/// Order in which the prefilter walks the corpus. With a proportion below 1.0
/// only a prefix of this order is ever examined, so the strategy decides which
/// trials can be found at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Most recent `start_date` first, undated trials last.
    #[default]
    Recent,
    /// Seeded permutation, identical across runs with the same seed.
    Sample,
    /// Corpus order.
    Natural,
}

impl SamplingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Sample => "sample",
            Self::Natural => "natural",
        }
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recent" => Ok(Self::Recent),
            "sample" => Ok(Self::Sample),
            "natural" => Ok(Self::Natural),
            other => Err(format!(
                "unknown sampling strategy `{other}` (expected recent, sample or natural)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RelevanceJudgment {
    pub row_id: RowId,
    pub certainty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    pub row_id: RowId,
    pub certainty: f64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Ranked,
    NoChunks,
    NoCandidates,
    FinalRankFailed,
    NoRankedMatches,
    Cancelled,
}

impl StopReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ranked => "ranked results available",
            Self::NoChunks => "no chunks to examine",
            Self::NoCandidates => "no trial passed the prefilter cutoff",
            Self::FinalRankFailed => "final ranking call failed",
            Self::NoRankedMatches => "final ranking returned no usable matches",
            Self::Cancelled => "run was cancelled",
        }
    }
}

/// Raw inputs and output of the final ranking call, kept for diagnosis when it
/// does not yield results.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FinalRankDiagnostics {
    pub candidate_ids: Vec<RowId>,
    pub context: String,
    pub raw_response: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub total_chunks: usize,
    pub checkpoint: usize,
    pub prefilter_calls: usize,
    pub failed_chunks: usize,
    /// Calls that never reached the model or were refused for auth.
    pub transport_failures: usize,
    pub judgments: usize,
    pub candidates: usize,
    pub final_calls: usize,
    pub stop: StopReason,
    pub cached: bool,
    pub diagnostics: Option<FinalRankDiagnostics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendOutcome {
    pub results: Option<Vec<RankedResult>>,
    pub report: RunReport,
}
