use crate::completion::{CompletionClient, CompletionRequest};
use crate::config::RecommendConfig;
use crate::corpus::Corpus;
use crate::extract::{parse_ranked, Extraction};
use crate::models::{FinalRankDiagnostics, RankedResult, TrialRecord};
use crate::prompt::{final_role, render_context, MISSING};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum FinalRank {
    Ranked(Vec<RankedResult>),
    /// The call succeeded and parsed, but no entry resolved to a corpus row.
    Empty(FinalRankDiagnostics),
    Failed {
        diagnostics: FinalRankDiagnostics,
        transport: bool,
    },
}

pub struct FinalRanker<'c, C: CompletionClient> {
    client: &'c C,
}

impl<'c, C: CompletionClient> FinalRanker<'c, C> {
    pub fn new(client: &'c C) -> Self {
        Self { client }
    }

    /// One completion call over the enriched candidate rows.
    pub fn rank(
        &self,
        corpus: &Corpus,
        candidates: &[&TrialRecord],
        user_prompt: &str,
        config: &RecommendConfig,
    ) -> FinalRank {
        let context = render_context(candidates);
        let system = final_role(&context);
        let request = CompletionRequest {
            model: &config.final_model,
            system: &system,
            user: user_prompt,
            temperature: config.final_temperature,
            seed: config.seed,
        };
        let mut diagnostics = FinalRankDiagnostics {
            candidate_ids: candidates.iter().map(|record| record.row_id).collect(),
            context,
            raw_response: None,
            error: None,
        };

        let text = match self.client.complete(&request) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, candidates = candidates.len(), "final ranking call failed");
                let transport = error.is_transport();
                diagnostics.error = Some(error.to_string());
                return FinalRank::Failed {
                    diagnostics,
                    transport,
                };
            }
        };

        let entries = match parse_ranked(&text) {
            Extraction::Parsed(entries) => entries,
            Extraction::ParseFailure { raw, reason } => {
                warn!(%reason, raw = %raw, "final ranking reply unparseable");
                diagnostics.raw_response = Some(raw);
                diagnostics.error = Some(reason);
                return FinalRank::Failed {
                    diagnostics,
                    transport: false,
                };
            }
        };

        let ranked: Vec<RankedResult> = entries
            .into_iter()
            .filter_map(|entry| {
                let Some(record) = corpus.get(entry.row_id) else {
                    warn!(row_id = entry.row_id, "dropping ranked entry for unknown row");
                    return None;
                };
                let title = entry
                    .title
                    .or_else(|| record.title.clone())
                    .unwrap_or_else(|| MISSING.to_string());
                Some(RankedResult {
                    row_id: entry.row_id,
                    certainty: entry.certainty,
                    title,
                })
            })
            .collect();

        debug!(ranked = ranked.len(), "final ranking parsed");
        if ranked.is_empty() {
            diagnostics.raw_response = Some(text);
            FinalRank::Empty(diagnostics)
        } else {
            FinalRank::Ranked(ranked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{titled, transport_failure, ScriptedClient};

    fn corpus() -> Corpus {
        let mut records = titled(&["A", "B", "C"]);
        records[2].title = None;
        records[1].inclusion_criteria = Some(vec!["Adults".to_string()]);
        Corpus::new(records).unwrap()
    }

    #[test]
    fn ranked_entries_resolve_against_corpus() {
        let corpus = corpus();
        let client = ScriptedClient::replying(&[
            "```json\n[{\"database_index\":1,\"certainty\":0.9,\"title\":\"B\"},\
             {\"database_index\":2,\"certainty\":0.6},\
             {\"database_index\":77,\"certainty\":0.99,\"title\":\"ghost\"}]\n```",
        ]);
        let config = RecommendConfig::default();
        let candidates = corpus.lookup(&[1, 2]);

        let outcome = FinalRanker::new(&client).rank(&corpus, &candidates, "USER", &config);
        let FinalRank::Ranked(ranked) = outcome else {
            panic!("expected ranked results");
        };

        assert_eq!(
            ranked,
            vec![
                RankedResult {
                    row_id: 1,
                    certainty: 0.9,
                    title: "B".to_string()
                },
                RankedResult {
                    row_id: 2,
                    certainty: 0.6,
                    title: "N/D".to_string()
                },
            ]
        );

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, config.final_model);
        assert!((calls[0].temperature - 1.0).abs() < f32::EPSILON);
        assert!(calls[0].system.contains("Inclusion: Adults"));
        assert!(!calls[0].system.contains("Title: A,"));
    }

    #[test]
    fn unparseable_reply_fails_with_diagnostics() {
        let corpus = corpus();
        let client = ScriptedClient::replying(&["I am unable to help with that."]);
        let candidates = corpus.lookup(&[0]);

        let outcome =
            FinalRanker::new(&client).rank(&corpus, &candidates, "q", &RecommendConfig::default());
        match outcome {
            FinalRank::Failed {
                diagnostics,
                transport,
            } => {
                assert!(!transport);
                assert_eq!(diagnostics.candidate_ids, vec![0]);
                assert!(diagnostics.context.contains("- id: 0, Title: A"));
                assert_eq!(
                    diagnostics.raw_response.as_deref(),
                    Some("I am unable to help with that.")
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn transport_failure_is_flagged() {
        let corpus = corpus();
        let client = ScriptedClient::new(vec![Err(transport_failure())]);
        let candidates = corpus.lookup(&[0]);

        let outcome =
            FinalRanker::new(&client).rank(&corpus, &candidates, "q", &RecommendConfig::default());
        assert!(matches!(outcome, FinalRank::Failed { transport: true, .. }));
    }

    #[test]
    fn reply_with_only_unknown_rows_is_empty() {
        let corpus = corpus();
        let client =
            ScriptedClient::replying(&["```json\n[{\"database_index\":9,\"certainty\":0.9}]\n```"]);
        let candidates = corpus.lookup(&[0]);

        let outcome =
            FinalRanker::new(&client).rank(&corpus, &candidates, "q", &RecommendConfig::default());
        assert!(matches!(outcome, FinalRank::Empty(_)));
    }
}
