use crate::completion::{CompletionClient, CompletionRequest};
use crate::config::RecommendConfig;
use crate::corpus::Corpus;
use crate::extract::{parse_judgments, Extraction};
use crate::models::RelevanceJudgment;
use crate::prompt::{prefilter_role, render_chunk};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub total_chunks: usize,
    /// Number of leading chunks that will be examined.
    pub checkpoint: usize,
}

/// `total_chunks = ceil(len / size)`, `checkpoint = ceil(total_chunks * proportion)`,
/// never more than `total_chunks`.
pub fn plan_chunks(corpus_len: usize, chunk_size: usize, proportion: f64) -> ChunkPlan {
    if corpus_len == 0 || chunk_size == 0 {
        return ChunkPlan {
            total_chunks: 0,
            checkpoint: 0,
        };
    }

    let total_chunks = corpus_len.div_ceil(chunk_size);
    let scaled = (total_chunks as f64 * proportion).ceil();
    let checkpoint = if scaled.is_finite() && scaled > 0.0 {
        (scaled as usize).min(total_chunks)
    } else {
        0
    };

    ChunkPlan {
        total_chunks,
        checkpoint,
    }
}

/// Cooperative stop signal, checked between chunk calls.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrefilterReport {
    pub total_chunks: usize,
    pub checkpoint: usize,
    pub calls: usize,
    pub failed_chunks: usize,
    pub transport_failures: usize,
    pub judgments: Vec<RelevanceJudgment>,
    pub cancelled: bool,
}

pub struct PrefilterScheduler<'c, C: CompletionClient> {
    client: &'c C,
}

impl<'c, C: CompletionClient> PrefilterScheduler<'c, C> {
    pub fn new(client: &'c C) -> Self {
        Self { client }
    }

    /// Issues one prefilter call per chunk, sequentially, for chunk indices
    /// `0..checkpoint`. A failed chunk contributes no judgments.
    pub fn run(
        &self,
        corpus: &Corpus,
        user_prompt: &str,
        config: &RecommendConfig,
        cancel: &CancellationFlag,
    ) -> PrefilterReport {
        let plan = plan_chunks(corpus.len(), config.chunk_size, config.proportion);
        let view = corpus.order(config.strategy, config.seed);
        let mut report = PrefilterReport {
            total_chunks: plan.total_chunks,
            checkpoint: plan.checkpoint,
            ..PrefilterReport::default()
        };

        info!(
            rows = corpus.len(),
            chunk_size = config.chunk_size,
            total_chunks = plan.total_chunks,
            checkpoint = plan.checkpoint,
            strategy = %config.strategy,
            "prefilter plan"
        );

        for index in 0..plan.checkpoint {
            if cancel.is_cancelled() {
                warn!(chunk = index, "prefilter cancelled before chunk call");
                report.cancelled = true;
                break;
            }

            let chunk = view.window(index * config.chunk_size, config.chunk_size);
            let system = prefilter_role(&render_chunk(&chunk));
            let request = CompletionRequest {
                model: &config.prefilter_model,
                system: &system,
                user: user_prompt,
                temperature: config.prefilter_temperature,
                seed: config.seed,
            };

            report.calls += 1;
            match self.client.complete(&request) {
                Ok(text) => match parse_judgments(&text) {
                    Extraction::Parsed(judgments) => {
                        debug!(
                            chunk = index,
                            start = chunk.start,
                            rows = chunk.len(),
                            judgments = judgments.len(),
                            "prefilter chunk parsed"
                        );
                        report.judgments.extend(judgments);
                    }
                    Extraction::ParseFailure { raw, reason } => {
                        warn!(chunk = index, %reason, raw = %raw, "prefilter reply unparseable");
                        report.failed_chunks += 1;
                    }
                },
                Err(error) => {
                    warn!(chunk = index, %error, "prefilter call failed");
                    report.failed_chunks += 1;
                    if error.is_transport() {
                        report.transport_failures += 1;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SamplingStrategy, TrialRecord};
    use crate::testing::{transport_failure, ScriptedClient};

    fn corpus_of(size: u64) -> Corpus {
        Corpus::new((0..size).map(|id| TrialRecord::new(id, format!("T{id}"))).collect()).unwrap()
    }

    fn config(chunk_size: usize, proportion: f64, strategy: SamplingStrategy) -> RecommendConfig {
        RecommendConfig {
            chunk_size,
            proportion,
            strategy,
            ..RecommendConfig::default()
        }
    }

    #[test]
    fn plan_matches_ceiling_formula() {
        assert_eq!(plan_chunks(0, 10, 1.0), ChunkPlan { total_chunks: 0, checkpoint: 0 });
        assert_eq!(plan_chunks(3, 3, 1.0), ChunkPlan { total_chunks: 1, checkpoint: 1 });
        assert_eq!(plan_chunks(1001, 500, 0.5), ChunkPlan { total_chunks: 3, checkpoint: 2 });
        assert_eq!(plan_chunks(10, 1, 0.25), ChunkPlan { total_chunks: 10, checkpoint: 3 });
        assert_eq!(plan_chunks(7, 2, 0.01), ChunkPlan { total_chunks: 4, checkpoint: 1 });
    }

    #[test]
    fn call_count_follows_plan_and_never_exceeds_total() {
        for (size, chunk_size, proportion) in [
            (0usize, 5usize, 0.5f64),
            (1, 5, 0.1),
            (9, 2, 0.5),
            (10, 3, 1.0),
            (25, 4, 0.75),
            (100, 7, 0.33),
        ] {
            let corpus = corpus_of(size as u64);
            let client = ScriptedClient::new(Vec::new());
            let report = PrefilterScheduler::new(&client).run(
                &corpus,
                "query",
                &config(chunk_size, proportion, SamplingStrategy::Natural),
                &CancellationFlag::new(),
            );

            let total = size.div_ceil(chunk_size);
            let expected = (total as f64 * proportion).ceil() as usize;
            assert_eq!(client.call_count(), expected, "size={size} chunk={chunk_size} p={proportion}");
            assert!(client.call_count() <= total);
            assert_eq!(report.calls, expected);
        }
    }

    #[test]
    fn chunks_are_sent_in_order_with_prefilter_parameters() {
        let corpus = corpus_of(5);
        let client = ScriptedClient::new(Vec::new());
        let mut cfg = config(2, 1.0, SamplingStrategy::Natural);
        cfg.prefilter_model = "small-model".to_string();

        PrefilterScheduler::new(&client).run(&corpus, "USER", &cfg, &CancellationFlag::new());

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].system.contains("- id: 0, Title: T0\n- id: 1, Title: T1\n"));
        assert!(calls[1].system.contains("- id: 2, Title: T2\n- id: 3, Title: T3\n"));
        assert!(calls[2].system.contains("- id: 4, Title: T4\n"));
        for call in &calls {
            assert_eq!(call.model, "small-model");
            assert_eq!(call.user, "USER");
            assert_eq!(call.seed, 123);
            assert!((call.temperature - 0.1).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn failed_chunks_do_not_stop_the_run() {
        let corpus = corpus_of(6);
        let client = ScriptedClient::new(vec![
            Err(transport_failure()),
            Ok("no json here".to_string()),
            Ok("```json\n[{\"database_index\": 5, \"certainty\": 0.8}]\n```".to_string()),
        ]);

        let report = PrefilterScheduler::new(&client).run(
            &corpus,
            "q",
            &config(2, 1.0, SamplingStrategy::Natural),
            &CancellationFlag::new(),
        );

        assert_eq!(report.calls, 3);
        assert_eq!(report.failed_chunks, 2);
        assert_eq!(report.transport_failures, 1);
        assert_eq!(
            report.judgments,
            vec![RelevanceJudgment {
                row_id: 5,
                certainty: 0.8
            }]
        );
    }

    #[test]
    fn sample_strategy_visits_identical_chunks_across_runs() {
        let corpus = corpus_of(40);
        let cfg = config(10, 0.5, SamplingStrategy::Sample);

        let first = ScriptedClient::new(Vec::new());
        PrefilterScheduler::new(&first).run(&corpus, "q", &cfg, &CancellationFlag::new());
        let second = ScriptedClient::new(Vec::new());
        PrefilterScheduler::new(&second).run(&corpus, "q", &cfg, &CancellationFlag::new());

        let systems = |client: &ScriptedClient| -> Vec<String> {
            client.calls().into_iter().map(|call| call.system).collect()
        };
        assert_eq!(systems(&first).len(), 2);
        assert_eq!(systems(&first), systems(&second));
    }

    #[test]
    fn cancellation_stops_before_next_chunk() {
        let corpus = corpus_of(10);
        let client = ScriptedClient::new(Vec::new());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let report = PrefilterScheduler::new(&client).run(
            &corpus,
            "q",
            &config(2, 1.0, SamplingStrategy::Natural),
            &cancel,
        );

        assert!(report.cancelled);
        assert_eq!(client.call_count(), 0);
    }
}
