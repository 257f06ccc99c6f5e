use crate::completion::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::error::{ConfigError, SettingsError};
use crate::models::SamplingStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_PROPORTION: f64 = 0.5;
pub const DEFAULT_CERTAINTY_CUTOFF: f64 = 0.5;
pub const DEFAULT_PREFILTER_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_FINAL_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_PREFILTER_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_FINAL_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_SEED: u64 = 123;

const MAX_TEMPERATURE: f32 = 2.0;

/// Parameters of one `recommend` call. Passed explicitly; there is no ambient
/// session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub chunk_size: usize,
    pub strategy: SamplingStrategy,
    /// Fraction of chunks examined, in (0, 1].
    pub proportion: f64,
    /// Judgments must be strictly above this to become candidates.
    pub certainty_cutoff: f64,
    pub prefilter_model: String,
    pub final_model: String,
    pub prefilter_temperature: f32,
    pub final_temperature: f32,
    /// Seeds both the `sample` permutation and the completion calls.
    pub seed: u64,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            strategy: SamplingStrategy::default(),
            proportion: DEFAULT_PROPORTION,
            certainty_cutoff: DEFAULT_CERTAINTY_CUTOFF,
            prefilter_model: DEFAULT_PREFILTER_MODEL.to_string(),
            final_model: DEFAULT_FINAL_MODEL.to_string(),
            prefilter_temperature: DEFAULT_PREFILTER_TEMPERATURE,
            final_temperature: DEFAULT_FINAL_TEMPERATURE,
            seed: DEFAULT_SEED,
        }
    }
}

impl RecommendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if !(self.proportion > 0.0 && self.proportion <= 1.0) {
            return Err(ConfigError::InvalidProportion(self.proportion));
        }
        if !(self.certainty_cutoff > 0.0 && self.certainty_cutoff < 1.0) {
            return Err(ConfigError::InvalidCutoff(self.certainty_cutoff));
        }
        validate_temperature("prefilter", self.prefilter_temperature)?;
        validate_temperature("final", self.final_temperature)?;
        if self.prefilter_model.trim().is_empty() {
            return Err(ConfigError::EmptyModel { phase: "prefilter" });
        }
        if self.final_model.trim().is_empty() {
            return Err(ConfigError::EmptyModel { phase: "final" });
        }
        Ok(())
    }
}

fn validate_temperature(phase: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=MAX_TEMPERATURE).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTemperature { phase, value })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        Url::parse(self.base_url.trim())?;
        if self.timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "api.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contents of a `trial-match.toml` file. Every table and field is optional.
///
/// ```toml
/// [api]
/// base_url = "https://api.groq.com/openai/v1"
/// timeout_secs = 30
///
/// [recommend]
/// strategy = "sample"
/// proportion = 0.75
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub recommend: RecommendConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Falls back to defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// `[recommend]` values may still be overridden after loading, so this only
    /// checks `[api]`.
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.api.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.api.validate()?;
        self.recommend
            .validate()
            .map_err(|error| SettingsError::Invalid(error.to_string()))
    }
}
