//! Response cache (C7): L1 exact-key lookup plus L2 semantic-similarity
//! lookup over the same entry pool, keyed by `(canonical_prompt, model_id,
//! quantized_temperature)`.
//!
//! Grounded in the teacher's `cache::Cache<K, V>` trait and
//! `cache::InMemoryCache` (TTL-bearing entries behind an `RwLock<HashMap>`);
//! generalized here into a two-layer structure since a single exact-key map
//! cannot serve L2's similarity lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::Embedder;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache error: {0}")]
    Other(String),
}

/// Quantizes a sampling temperature to one decimal place for key purposes.
/// Policy decision recorded in the project's grounding ledger: the exact
/// temperature is kept in [`CachedResponse::temperature`] for audit/metrics,
/// only the quantized value participates in the key.
fn quantize_temperature(temperature: f32) -> i32 {
    (temperature * 10.0).round() as i32
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    canonical_prompt: String,
    model_id: String,
    quantized_temperature: i32,
}

fn canonicalize(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub key_hash: String,
    pub prompt: String,
    pub embedding: Vec<f32>,
    pub model_id: String,
    pub response: String,
    pub temperature: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

struct Entry {
    response: CachedResponse,
    expires_at: Option<Instant>,
    last_used: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|e| e < Instant::now()).unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheMetrics {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub rejected_temperature: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let hits = (self.l1_hits + self.l2_hits) as f64;
        let total = hits + self.misses as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

pub enum CacheLookup {
    /// L1 exact-key hit.
    ExactHit(CachedResponse),
    /// L2 similarity hit, with the winning cosine score.
    SemanticHit(CachedResponse, f32),
    Miss,
}

/// Two-layer response cache. `temperature_cacheable_ceiling` is θ_cache
/// (spec default 0.1); responses sampled above it are never stored.
/// `l2_similarity_threshold` is θ (spec default 0.95).
pub struct ResponseCache {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    ttl: Duration,
    max_entries: usize,
    temperature_cacheable_ceiling: f32,
    l2_similarity_threshold: f32,
    metrics: std::sync::Mutex<CacheMetrics>,
}

impl ResponseCache {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        ttl: Duration,
        max_entries: usize,
        temperature_cacheable_ceiling: f32,
        l2_similarity_threshold: f32,
    ) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
            temperature_cacheable_ceiling,
            l2_similarity_threshold,
            metrics: std::sync::Mutex::new(CacheMetrics::default()),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        *self.metrics.lock().unwrap()
    }

    /// L1 then L2 lookup. L2 only ever compares entries sharing the same
    /// `(model_id, quantized_temperature)` band, so a hit can never cross
    /// model identity (spec §4.7 invariant).
    pub async fn lookup(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f32,
    ) -> Result<CacheLookup, CacheError> {
        let canonical = canonicalize(prompt);
        let band = quantize_temperature(temperature);
        let key = CacheKey {
            canonical_prompt: canonical.clone(),
            model_id: model_id.to_string(),
            quantized_temperature: band,
        };

        {
            let mut guard = self.entries.write().await;
            if let Some(entry) = guard.get_mut(&key) {
                if !entry.is_expired() {
                    entry.last_used = Instant::now();
                    let response = entry.response.clone();
                    self.metrics.lock().unwrap().l1_hits += 1;
                    return Ok(CacheLookup::ExactHit(response));
                }
                guard.remove(&key);
            }
        }

        let query_embedding = self
            .embedder
            .embed(&[prompt])
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::Other("embedder returned no vector".into()))?;

        let mut best: Option<(CacheKey, f32)> = None;
        {
            let guard = self.entries.read().await;
            for (k, entry) in guard.iter() {
                if entry.is_expired() {
                    continue;
                }
                if k.model_id != model_id || k.quantized_temperature != band {
                    continue;
                }
                let score = cosine_similarity(&query_embedding, &entry.response.embedding);
                if score >= self.l2_similarity_threshold {
                    if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                        best = Some((k.clone(), score));
                    }
                }
            }
        }

        if let Some((winning_key, score)) = best {
            let mut guard = self.entries.write().await;
            if let Some(entry) = guard.get_mut(&winning_key) {
                entry.last_used = Instant::now();
                let response = entry.response.clone();
                self.metrics.lock().unwrap().l2_hits += 1;
                return Ok(CacheLookup::SemanticHit(response, score));
            }
        }

        self.metrics.lock().unwrap().misses += 1;
        Ok(CacheLookup::Miss)
    }

    /// Stores `response` if `temperature <= temperature_cacheable_ceiling`.
    /// Silently declines (counting a metric) otherwise, matching spec
    /// §4.7's "cache only if... temperature ≤ θ_cache" write policy rather
    /// than erroring on a disqualified write.
    pub async fn put(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f32,
        response: String,
    ) -> Result<(), CacheError> {
        if temperature > self.temperature_cacheable_ceiling {
            self.metrics.lock().unwrap().rejected_temperature += 1;
            return Ok(());
        }

        let canonical = canonicalize(prompt);
        let embedding = self
            .embedder
            .embed(&[prompt])
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::Other("embedder returned no vector".into()))?;

        let key = CacheKey {
            canonical_prompt: canonical,
            model_id: model_id.to_string(),
            quantized_temperature: quantize_temperature(temperature),
        };
        let key_hash = crate::ids::content_hash(format!("{key:?}").as_bytes()).to_string();

        let cached = CachedResponse {
            key_hash,
            prompt: prompt.to_string(),
            embedding,
            model_id: model_id.to_string(),
            response,
            temperature,
            created_at: chrono::Utc::now(),
        };

        let mut guard = self.entries.write().await;
        if !guard.contains_key(&key) && guard.len() >= self.max_entries {
            evict_lru(&mut guard);
        }
        guard.insert(
            key,
            Entry {
                response: cached,
                expires_at: Some(Instant::now() + self.ttl),
                last_used: Instant::now(),
            },
        );
        self.metrics.lock().unwrap().writes += 1;
        Ok(())
    }
}

fn evict_lru(entries: &mut HashMap<CacheKey, Entry>) {
    if let Some(victim) = entries
        .iter()
        .min_by_key(|(_, e)| e.last_used)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&victim);
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HashEmbedder;

    fn cache() -> ResponseCache {
        ResponseCache::new(
            Arc::new(HashEmbedder::new(16)),
            Duration::from_secs(60),
            100,
            0.1,
            0.95,
        )
    }

    #[tokio::test]
    async fn exact_key_hit_returns_l1() {
        let cache = cache();
        cache
            .put("What is EB-1A?", "M1", 0.0, "An immigrant visa category.".into())
            .await
            .unwrap();
        let hit = cache.lookup("What is EB-1A?", "M1", 0.0).await.unwrap();
        assert!(matches!(hit, CacheLookup::ExactHit(_)));
    }

    #[tokio::test]
    async fn rejects_write_above_temperature_ceiling() {
        let cache = cache();
        cache.put("hot prompt", "M1", 0.9, "resp".into()).await.unwrap();
        let hit = cache.lookup("hot prompt", "M1", 0.9).await.unwrap();
        assert!(matches!(hit, CacheLookup::Miss));
        assert_eq!(cache.metrics().rejected_temperature, 1);
    }

    #[tokio::test]
    async fn different_model_id_never_hits() {
        let cache = cache();
        cache
            .put("What is EB-1A?", "M1", 0.0, "resp".into())
            .await
            .unwrap();
        let hit = cache.lookup("What is EB-1A?", "M2", 0.0).await.unwrap();
        assert!(matches!(hit, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn canonicalization_ignores_whitespace_and_case() {
        let cache = cache();
        cache
            .put("What   is EB-1A?", "M1", 0.0, "resp".into())
            .await
            .unwrap();
        let hit = cache.lookup("what is eb-1a?", "M1", 0.0).await.unwrap();
        assert!(matches!(hit, CacheLookup::ExactHit(_)));
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_misses() {
        let cache = ResponseCache::new(
            Arc::new(HashEmbedder::new(16)),
            Duration::from_millis(20),
            100,
            0.1,
            0.95,
        );
        cache.put("p", "M1", 0.0, "resp".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let hit = cache.lookup("p", "M1", 0.0).await.unwrap();
        assert!(matches!(hit, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn eviction_caps_entry_count() {
        let cache = ResponseCache::new(Arc::new(HashEmbedder::new(16)), Duration::from_secs(60), 2, 0.1, 0.95);
        cache.put("a", "M1", 0.0, "1".into()).await.unwrap();
        cache.put("b", "M1", 0.0, "2".into()).await.unwrap();
        cache.put("c", "M1", 0.0, "3".into()).await.unwrap();
        let guard = cache.entries.read().await;
        assert_eq!(guard.len(), 2);
    }
}
