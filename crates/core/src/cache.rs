use crate::config::RecommendConfig;
use crate::corpus::Corpus;
use crate::models::{RankedResult, StopReason};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedOutcome {
    pub results: Option<Vec<RankedResult>>,
    pub stop: StopReason,
}

/// Memoizes finished runs. Keys cover the query, the corpus snapshot and
/// every parameter, including models and seed.
#[derive(Debug)]
pub struct RecommendationCache {
    capacity: usize,
    inner: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedOutcome>,
    insertion_order: VecDeque<String>,
}

impl Default for RecommendationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl RecommendationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedOutcome> {
        let state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.get(key).cloned()
    }

    /// Oldest entries are evicted first once capacity is reached.
    pub fn insert(&self, key: String, outcome: CachedOutcome) {
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.entries.insert(key.clone(), outcome).is_none() {
            state.insertion_order.push_back(key);
        }
        while state.entries.len() > self.capacity {
            match state.insertion_order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        let state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn cache_key(query: &str, corpus: &Corpus, config: &RecommendConfig) -> String {
    fn field(hasher: &mut Sha256, bytes: &[u8]) {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    let mut hasher = Sha256::new();
    field(&mut hasher, query.trim().as_bytes());
    field(&mut hasher, corpus.fingerprint().as_bytes());
    field(&mut hasher, &(config.chunk_size as u64).to_le_bytes());
    field(&mut hasher, config.strategy.as_str().as_bytes());
    field(&mut hasher, &config.proportion.to_bits().to_le_bytes());
    field(&mut hasher, &config.certainty_cutoff.to_bits().to_le_bytes());
    field(&mut hasher, config.prefilter_model.as_bytes());
    field(&mut hasher, config.final_model.as_bytes());
    field(&mut hasher, &config.prefilter_temperature.to_bits().to_le_bytes());
    field(&mut hasher, &config.final_temperature.to_bits().to_le_bytes());
    field(&mut hasher, &config.seed.to_le_bytes());

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SamplingStrategy;
    use crate::testing::titled;

    #[test]
    fn key_changes_with_every_parameter() {
        let corpus = Corpus::new(titled(&["A", "B"])).unwrap();
        let base = RecommendConfig::default();
        let base_key = cache_key("asthma", &corpus, &base);

        assert_eq!(base_key, cache_key("  asthma ", &corpus, &base));
        assert_ne!(base_key, cache_key("copd", &corpus, &base));

        let variants = [
            RecommendConfig { seed: 124, ..base.clone() },
            RecommendConfig { prefilter_model: "other".to_string(), ..base.clone() },
            RecommendConfig { final_model: "other".to_string(), ..base.clone() },
            RecommendConfig { strategy: SamplingStrategy::Sample, ..base.clone() },
            RecommendConfig { proportion: 0.75, ..base.clone() },
            RecommendConfig { certainty_cutoff: 0.6, ..base.clone() },
            RecommendConfig { chunk_size: 100, ..base.clone() },
            RecommendConfig { final_temperature: 0.7, ..base.clone() },
        ];
        for variant in variants {
            assert_ne!(base_key, cache_key("asthma", &corpus, &variant), "{variant:?}");
        }

        let other_corpus = Corpus::new(titled(&["A", "C"])).unwrap();
        assert_ne!(base_key, cache_key("asthma", &other_corpus, &base));
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let cache = RecommendationCache::with_capacity(2);
        let outcome = CachedOutcome {
            results: None,
            stop: StopReason::NoCandidates,
        };
        cache.insert("a".to_string(), outcome.clone());
        cache.insert("b".to_string(), outcome.clone());
        cache.insert("a".to_string(), outcome.clone());
        cache.insert("c".to_string(), outcome.clone());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(outcome.clone()));
        assert_eq!(cache.get("c"), Some(outcome));
    }
}
