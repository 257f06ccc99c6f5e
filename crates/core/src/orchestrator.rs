use crate::aggregator::CandidateSet;
use crate::cache::{cache_key, CachedOutcome, RecommendationCache};
use crate::completion::CompletionClient;
use crate::config::RecommendConfig;
use crate::corpus::Corpus;
use crate::error::ConfigError;
use crate::models::{RankedResult, RecommendOutcome, RunReport, StopReason};
use crate::prompt::user_prompt;
use crate::ranker::{FinalRank, FinalRanker};
use crate::scheduler::{plan_chunks, CancellationFlag, PrefilterScheduler};
use std::sync::Arc;
use tracing::{debug, info, info_span};
use uuid::Uuid;

/// Runs the prefilter and final ranking for one query at a time. Each call
/// keeps its accumulators local, so a coordinator can serve concurrent
/// callers over a shared corpus.
pub struct RecommendCoordinator<C>
where
    C: CompletionClient,
{
    client: C,
    cache: Option<Arc<RecommendationCache>>,
}

impl<C> RecommendCoordinator<C>
where
    C: CompletionClient,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RecommendationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Ranked matches for `query`, or `None` when no relevant study was
    /// found. Only invalid configuration is an error.
    pub fn recommend(
        &self,
        query: &str,
        corpus: &Corpus,
        config: &RecommendConfig,
    ) -> Result<Option<Vec<RankedResult>>, ConfigError> {
        let outcome = self.run(query, corpus, config, &CancellationFlag::new())?;
        Ok(outcome.results)
    }

    pub fn run(
        &self,
        query: &str,
        corpus: &Corpus,
        config: &RecommendConfig,
        cancel: &CancellationFlag,
    ) -> Result<RecommendOutcome, ConfigError> {
        config.validate()?;
        if query.trim().is_empty() {
            return Err(ConfigError::EmptyQuery);
        }

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("recommend", run_id = %run_id);
        let _guard = span.enter();

        let plan = plan_chunks(corpus.len(), config.chunk_size, config.proportion);
        let mut report = RunReport {
            run_id,
            total_chunks: plan.total_chunks,
            checkpoint: plan.checkpoint,
            prefilter_calls: 0,
            failed_chunks: 0,
            transport_failures: 0,
            judgments: 0,
            candidates: 0,
            final_calls: 0,
            stop: StopReason::NoChunks,
            cached: false,
            diagnostics: None,
        };

        let key = self
            .cache
            .as_ref()
            .map(|_| cache_key(query, corpus, config));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                info!(stop = ?hit.stop, "recommendation served from cache");
                report.cached = true;
                report.stop = hit.stop;
                return Ok(RecommendOutcome {
                    results: hit.results,
                    report,
                });
            }
        }

        let prompt = user_prompt(query);

        debug!(state = "prefiltering", checkpoint = plan.checkpoint);
        let prefilter = PrefilterScheduler::new(&self.client).run(corpus, &prompt, config, cancel);
        report.prefilter_calls = prefilter.calls;
        report.failed_chunks = prefilter.failed_chunks;
        report.transport_failures = prefilter.transport_failures;
        report.judgments = prefilter.judgments.len();

        if prefilter.cancelled {
            return Ok(self.finish(report, None, StopReason::Cancelled, None));
        }
        if plan.checkpoint == 0 {
            return Ok(self.finish(report, None, StopReason::NoChunks, key));
        }

        let cacheable = prefilter.failed_chunks == 0;

        debug!(state = "aggregating", judgments = prefilter.judgments.len());
        let candidates = CandidateSet::from_judgments(&prefilter.judgments, config.certainty_cutoff);
        let rows = candidates.resolve(corpus);
        report.candidates = rows.len();

        if rows.is_empty() {
            let key = key.filter(|_| cacheable);
            return Ok(self.finish(report, None, StopReason::NoCandidates, key));
        }
        if cancel.is_cancelled() {
            return Ok(self.finish(report, None, StopReason::Cancelled, None));
        }

        debug!(state = "final_ranking", candidates = rows.len());
        report.final_calls = 1;
        match FinalRanker::new(&self.client).rank(corpus, &rows, &prompt, config) {
            FinalRank::Ranked(ranked) => {
                let key = key.filter(|_| cacheable);
                Ok(self.finish(report, Some(ranked), StopReason::Ranked, key))
            }
            FinalRank::Empty(diagnostics) => {
                report.diagnostics = Some(diagnostics);
                let key = key.filter(|_| cacheable);
                Ok(self.finish(report, None, StopReason::NoRankedMatches, key))
            }
            FinalRank::Failed {
                diagnostics,
                transport,
            } => {
                if transport {
                    report.transport_failures += 1;
                }
                report.diagnostics = Some(diagnostics);
                Ok(self.finish(report, None, StopReason::FinalRankFailed, None))
            }
        }
    }

    fn finish(
        &self,
        mut report: RunReport,
        results: Option<Vec<RankedResult>>,
        stop: StopReason,
        cache_key: Option<String>,
    ) -> RecommendOutcome {
        report.stop = stop;
        info!(
            stop = ?stop,
            prefilter_calls = report.prefilter_calls,
            failed_chunks = report.failed_chunks,
            transport_failures = report.transport_failures,
            candidates = report.candidates,
            final_calls = report.final_calls,
            results = results.as_ref().map_or(0, Vec::len),
            "recommendation finished"
        );

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(
                key,
                CachedOutcome {
                    results: results.clone(),
                    stop,
                },
            );
        }

        RecommendOutcome { results, report }
    }
}
