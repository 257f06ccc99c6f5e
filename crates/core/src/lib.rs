pub mod aggregator;
pub mod cache;
pub mod completion;
pub mod config;
pub mod corpus;
pub mod error;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod ranker;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::CandidateSet;
pub use cache::{cache_key, CachedOutcome, RecommendationCache, DEFAULT_CACHE_CAPACITY};
pub use completion::{
    ChatCompletionsClient, CompletionClient, CompletionRequest, ModelInfo, DEFAULT_BASE_URL,
    DEFAULT_MIN_CONTEXT_WINDOW, DEFAULT_TIMEOUT_SECS,
};
pub use config::{ApiSettings, RecommendConfig, Settings};
pub use corpus::{Chunk, Corpus, OrderedView};
pub use error::{CompletionError, ConfigError, CorpusError, SettingsError};
pub use extract::{extract_json_array, parse_judgments, parse_ranked, Extraction, RankedEntry};
pub use models::{
    FinalRankDiagnostics, RankedResult, RecommendOutcome, RelevanceJudgment, RowId, RunReport,
    SamplingStrategy, StopReason, TrialRecord,
};
pub use orchestrator::RecommendCoordinator;
pub use prompt::{final_role, prefilter_role, render_chunk, render_context, user_prompt};
pub use ranker::{FinalRank, FinalRanker};
pub use scheduler::{plan_chunks, CancellationFlag, ChunkPlan, PrefilterReport, PrefilterScheduler};
