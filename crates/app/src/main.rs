use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trial_match_core::{
    CancellationFlag, ChatCompletionsClient, Corpus, RecommendCoordinator, RecommendOutcome,
    SamplingStrategy, Settings, DEFAULT_MIN_CONTEXT_WINDOW,
};

#[derive(Parser)]
#[command(name = "trial-match", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file with [api] and [recommend] tables
    #[arg(long, env = "TRIAL_MATCH_CONFIG", default_value = "trial-match.toml")]
    config: PathBuf,

    /// OpenAI-compatible chat completion base URL
    #[arg(long, env = "TRIAL_MATCH_BASE_URL")]
    base_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Find the trials that best match a free-text clinical query.
    Recommend {
        /// Clinical query, e.g. a patient description or research question.
        #[arg(long)]
        query: String,
        /// Trial table as .json or .jsonl.
        #[arg(long)]
        corpus: PathBuf,
        /// Trials per prefilter call.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Walk order: recent, sample or natural. Only the leading chunks of
        /// this order are examined when the proportion is below 1.
        #[arg(long)]
        strategy: Option<SamplingStrategy>,
        /// Fraction of chunks to examine, in (0, 1].
        #[arg(long)]
        proportion: Option<f64>,
        /// Prefilter certainty a trial must exceed to reach the final ranking.
        #[arg(long)]
        certainty_cutoff: Option<f64>,
        #[arg(long)]
        prefilter_model: Option<String>,
        #[arg(long)]
        final_model: Option<String>,
        #[arg(long)]
        prefilter_temperature: Option<f32>,
        #[arg(long)]
        final_temperature: Option<f32>,
        /// Seed for the sample order and the completion calls.
        #[arg(long)]
        seed: Option<u64>,
        /// Print the outcome and run report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Print the run report after the results.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// List completion models large enough for prefilter chunks.
    Models {
        /// Models must have a context window above this many tokens.
        #[arg(long, default_value_t = DEFAULT_MIN_CONTEXT_WINDOW)]
        min_context_window: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(base_url) = cli.base_url {
        settings.api.base_url = base_url;
    }
    if let Some(api_key) = cli.api_key {
        settings.api.api_key = Some(api_key);
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.api.timeout_secs = timeout_secs;
    }
    settings.api.validate()?;

    if settings.api.api_key.is_none() {
        warn!("no api key configured; set GROQ_API_KEY or pass --api-key");
    }

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        base_url = %settings.api.base_url,
        "trial-match boot"
    );

    match cli.command {
        Command::Recommend {
            query,
            corpus,
            chunk_size,
            strategy,
            proportion,
            certainty_cutoff,
            prefilter_model,
            final_model,
            prefilter_temperature,
            final_temperature,
            seed,
            json,
            explain,
        } => {
            let recommend = &mut settings.recommend;
            if let Some(chunk_size) = chunk_size {
                recommend.chunk_size = chunk_size;
            }
            if let Some(strategy) = strategy {
                recommend.strategy = strategy;
            }
            if let Some(proportion) = proportion {
                recommend.proportion = proportion;
            }
            if let Some(certainty_cutoff) = certainty_cutoff {
                recommend.certainty_cutoff = certainty_cutoff;
            }
            if let Some(prefilter_model) = prefilter_model {
                recommend.prefilter_model = prefilter_model;
            }
            if let Some(final_model) = final_model {
                recommend.final_model = final_model;
            }
            if let Some(prefilter_temperature) = prefilter_temperature {
                recommend.prefilter_temperature = prefilter_temperature;
            }
            if let Some(final_temperature) = final_temperature {
                recommend.final_temperature = final_temperature;
            }
            if let Some(seed) = seed {
                recommend.seed = seed;
            }
            settings.validate()?;
            let config = settings.recommend.clone();

            let corpus = Arc::new(
                Corpus::from_path(&corpus)
                    .with_context(|| format!("loading corpus from {}", corpus.display()))?,
            );
            info!(
                rows = corpus.len(),
                fingerprint = %corpus.fingerprint(),
                strategy = %config.strategy,
                proportion = config.proportion,
                "corpus loaded"
            );

            let cancel = CancellationFlag::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping before the next call");
                    watcher.cancel();
                }
            });

            let api = settings.api.clone();
            let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<RecommendOutcome> {
                let client =
                    ChatCompletionsClient::new(&api.base_url, api.api_key.clone(), api.timeout())?;
                let coordinator = RecommendCoordinator::new(client);
                Ok(coordinator.run(&query, &corpus, &config, &cancel)?)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            print_outcome(&outcome);
            if explain {
                print_report(&outcome);
            }
        }
        Command::Models { min_context_window } => {
            let api = settings.api.clone();
            let models = tokio::task::spawn_blocking(move || {
                ChatCompletionsClient::new(&api.base_url, api.api_key.clone(), api.timeout())
                    .and_then(|client| client.list_models(min_context_window))
            })
            .await??;

            if models.is_empty() {
                println!("no models with a context window above {min_context_window}");
            }
            for model in models {
                println!(
                    "{} owned_by={} active={} context_window={} max_completion_tokens={}",
                    model.id,
                    model.owned_by.as_deref().unwrap_or("-"),
                    model.active.map_or("-".to_string(), |active| active.to_string()),
                    model
                        .context_window
                        .map_or("-".to_string(), |window| window.to_string()),
                    model
                        .max_completion_tokens
                        .map_or("-".to_string(), |tokens| tokens.to_string()),
                );
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &RecommendOutcome) {
    match &outcome.results {
        Some(results) => {
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "[{}] certainty={:.2} row_id={} title={}",
                    rank + 1,
                    result.certainty,
                    result.row_id,
                    result.title
                );
            }
        }
        None => {
            println!(
                "no relevant studies found ({})",
                outcome.report.stop.describe()
            );
        }
    }
}

fn print_report(outcome: &RecommendOutcome) {
    let report = &outcome.report;
    println!(
        "explain: run_id={} chunks={}/{} prefilter_calls={} failed_chunks={} transport_failures={} judgments={} candidates={} final_calls={} cached={}",
        report.run_id,
        report.checkpoint,
        report.total_chunks,
        report.prefilter_calls,
        report.failed_chunks,
        report.transport_failures,
        report.judgments,
        report.candidates,
        report.final_calls,
        report.cached
    );
    if let Some(diagnostics) = &report.diagnostics {
        println!("explain: final candidates={:?}", diagnostics.candidate_ids);
        if let Some(error) = &diagnostics.error {
            println!("explain: final error={error}");
        }
        if let Some(raw) = &diagnostics.raw_response {
            println!("explain: final raw response:\n{raw}");
        }
    }
}
