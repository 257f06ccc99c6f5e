use crate::corpus::Corpus;
use crate::models::{RelevanceJudgment, RowId, TrialRecord};
use std::collections::HashMap;
use tracing::warn;

/// Prefilter judgments strictly above the cutoff, one per row id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    judgments: Vec<RelevanceJudgment>,
}

impl CandidateSet {
    /// Keeps `certainty > cutoff`, then deduplicates by row id. A later
    /// judgment for the same row replaces the certainty of an earlier one but
    /// keeps its position.
    pub fn from_judgments(judgments: &[RelevanceJudgment], cutoff: f64) -> Self {
        let mut positions: HashMap<RowId, usize> = HashMap::new();
        let mut kept: Vec<RelevanceJudgment> = Vec::new();

        for judgment in judgments.iter().filter(|j| j.certainty > cutoff) {
            match positions.get(&judgment.row_id) {
                Some(position) => kept[*position] = *judgment,
                None => {
                    positions.insert(judgment.row_id, kept.len());
                    kept.push(*judgment);
                }
            }
        }

        Self { judgments: kept }
    }

    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }

    pub fn judgments(&self) -> &[RelevanceJudgment] {
        &self.judgments
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.judgments.iter().map(|j| j.row_id).collect()
    }

    /// Corpus rows for the candidates. Identifiers the corpus does not know
    /// are dropped with a warning.
    pub fn resolve<'a>(&self, corpus: &'a Corpus) -> Vec<&'a TrialRecord> {
        for judgment in &self.judgments {
            if !corpus.contains(judgment.row_id) {
                warn!(
                    row_id = judgment.row_id,
                    certainty = judgment.certainty,
                    "dropping judgment for unknown row"
                );
            }
        }
        corpus.lookup(&self.row_ids())
    }
}
