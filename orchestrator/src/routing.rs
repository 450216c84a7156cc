//! Model routing + budget tracking (C15): selects a provider by
//! cost-minimizing policy subject to a per-request and global budget cap,
//! consults the response cache first, falls back to the next-preferred
//! provider on error, and disables non-essential features once the global
//! budget is exhausted.
//!
//! Grounded in the teacher's `llm::{LlmClient, ChatOpenAI, MockLlm}` trait
//! shape (`invoke(messages) -> LlmResponse`) and `model_spec` module's
//! provider/model metadata (cost fields); generalized here into a
//! provider-registry-plus-router on top of those narrow clients, since the
//! teacher picks one configured client rather than routing across several
//! by cost. `config::ProviderConfig` carries the `{id, cost_per_token,
//! token_limit, supports}` fields spec §4.15 names.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use config::ProviderConfig;
use tokio::sync::Mutex;

use crate::cache::{CacheLookup, ResponseCache};
use crate::error::OrchestratorError;

/// One completed model call.
#[derive(Debug, Clone)]
pub struct ModelCompletion {
    pub text: String,
    pub tokens_used: u32,
    pub cached: bool,
    pub provider_id: String,
}

/// The narrow interface spec §1 says the LLM provider SDKs are consumed
/// through, mirroring the teacher's `LlmClient::invoke`. One instance per
/// provider id, registered into the [`ModelRouter`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<ModelCompletion, OrchestratorError>;
}

/// Deterministic test/demo client, mirroring the teacher's `MockLlm`: always
/// returns a fixed response, token count approximated from prompt length so
/// budget math is exercisable in tests without a real tokenizer.
pub struct MockModelClient {
    provider_id: String,
    response: String,
}

impl MockModelClient {
    pub fn new(provider_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            response: response.into(),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, prompt: &str, _temperature: f32) -> Result<ModelCompletion, OrchestratorError> {
        Ok(ModelCompletion {
            text: self.response.clone(),
            tokens_used: estimate_tokens(prompt),
            cached: false,
            provider_id: self.provider_id.clone(),
        })
    }
}

/// A client that always fails, for exercising provider fallback.
pub struct FailingModelClient {
    provider_id: String,
}

impl FailingModelClient {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

#[async_trait]
impl ModelClient for FailingModelClient {
    async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<ModelCompletion, OrchestratorError> {
        Err(OrchestratorError::ProviderUnavailable(self.provider_id.clone()))
    }
}

/// Crude token estimate (whitespace word count, minimum 1) used only for
/// cost accounting in the absence of a real tokenizer; a production
/// deployment would get token counts back from the provider's response.
fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count().max(1) as u32
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RoutingMetrics {
    pub calls_routed: u64,
    pub calls_cached: u64,
    pub fallbacks: u64,
    pub budget_rejections: u64,
    pub total_cost: f64,
}

/// Selects among configured providers by cost-minimizing policy, consults
/// the [`ResponseCache`] first, falls back through the remaining providers
/// on error, and tracks spend against a per-request and a global budget cap
/// (spec §4.15).
pub struct ModelRouter {
    providers: Vec<ProviderConfig>,
    clients: HashMap<String, Arc<dyn ModelClient>>,
    cache: Option<Arc<ResponseCache>>,
    per_request_budget: f64,
    global_remaining: Mutex<f64>,
    warn_threshold: f64,
    metrics: Mutex<RoutingMetrics>,
    essential_only: std::sync::atomic::AtomicBool,
}

impl ModelRouter {
    pub fn new(
        mut providers: Vec<ProviderConfig>,
        clients: HashMap<String, Arc<dyn ModelClient>>,
        cache: Option<Arc<ResponseCache>>,
        per_request_budget: f64,
        global_budget: f64,
        warn_threshold: f64,
    ) -> Self {
        providers.sort_by(|a, b| a.cost_per_token.partial_cmp(&b.cost_per_token).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            providers,
            clients,
            cache,
            per_request_budget,
            global_remaining: Mutex::new(global_budget),
            warn_threshold,
            metrics: Mutex::new(RoutingMetrics::default()),
            essential_only: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn metrics(&self) -> RoutingMetrics {
        *self.metrics.lock().await
    }

    pub async fn remaining_budget(&self) -> f64 {
        *self.global_remaining.lock().await
    }

    /// Whether the router has disabled non-essential features after
    /// crossing `warn_threshold` (spec §4.15 step 4, §7 `BudgetExceeded`
    /// propagation: "in-flight nodes complete but do not start new
    /// provider calls").
    pub fn is_essential_only(&self) -> bool {
        self.essential_only.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Routes one completion request: cache lookup for the cheapest
    /// candidate provider first, then providers in cost order, falling back
    /// on `ProviderUnavailable`. Every candidate whose estimated cost would
    /// exceed the per-request or global remaining budget is skipped; if no
    /// candidate remains, the call fails with `BudgetExceeded` rather than
    /// attempting a call that cannot be paid for (spec §8 property 9 and
    /// S6).
    pub async fn complete(&self, prompt: &str, temperature: f32) -> Result<ModelCompletion, OrchestratorError> {
        let mut last_err: Option<OrchestratorError> = None;

        for provider in &self.providers {
            if !provider.supports_chat {
                continue;
            }

            if let Some(cache) = &self.cache {
                match cache.lookup(prompt, &provider.id, temperature).await {
                    Ok(CacheLookup::ExactHit(response)) | Ok(CacheLookup::SemanticHit(response, _)) => {
                        self.metrics.lock().await.calls_cached += 1;
                        return Ok(ModelCompletion {
                            text: response.response,
                            tokens_used: 0,
                            cached: true,
                            provider_id: provider.id.clone(),
                        });
                    }
                    _ => {}
                }
            }

            let estimated_cost = provider.cost_per_token * estimate_tokens(prompt) as f64;
            if estimated_cost > self.per_request_budget {
                continue;
            }
            {
                let remaining = self.global_remaining.lock().await;
                if *remaining - estimated_cost < 0.0 {
                    continue;
                }
            }

            let client = match self.clients.get(&provider.id) {
                Some(c) => c.clone(),
                None => continue,
            };

            match client.complete(prompt, temperature).await {
                Ok(completion) => {
                    self.charge(provider, completion.tokens_used).await;
                    if let Some(cache) = &self.cache {
                        let _ = cache.put(prompt, &provider.id, temperature, completion.text.clone()).await;
                    }
                    let mut metrics = self.metrics.lock().await;
                    metrics.calls_routed += 1;
                    return Ok(completion);
                }
                Err(err) => {
                    self.metrics.lock().await.fallbacks += 1;
                    tracing::warn!(provider = %provider.id, %err, "provider failed, falling back");
                    last_err = Some(err);
                    continue;
                }
            }
        }

        self.metrics.lock().await.budget_rejections += 1;
        match last_err {
            Some(err) => Err(err),
            None => Err(OrchestratorError::BudgetExceeded),
        }
    }

    async fn charge(&self, provider: &ProviderConfig, tokens_used: u32) {
        let cost = provider.cost_per_token * tokens_used as f64;
        let mut remaining = self.global_remaining.lock().await;
        *remaining -= cost;
        let mut metrics = self.metrics.lock().await;
        metrics.total_cost += cost;
        if *remaining < self.warn_threshold {
            self.essential_only.store(true, std::sync::atomic::Ordering::SeqCst);
            tracing::warn!(remaining = *remaining, "global budget below warn threshold, disabling non-essential features");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HashEmbedder;
    use std::time::Duration;

    fn provider(id: &str, cost_per_token: f64) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            cost_per_token,
            token_limit: 8192,
            supports_chat: true,
            supports_embed: false,
        }
    }

    fn router_no_cache(providers: Vec<ProviderConfig>, clients: HashMap<String, Arc<dyn ModelClient>>, per_request: f64, global: f64) -> ModelRouter {
        ModelRouter::new(providers, clients, None, per_request, global, 0.01)
    }

    #[tokio::test]
    async fn selects_cheapest_provider_first() {
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert("cheap".into(), Arc::new(MockModelClient::new("cheap", "from cheap")));
        clients.insert("pricey".into(), Arc::new(MockModelClient::new("pricey", "from pricey")));
        let router = router_no_cache(
            vec![provider("pricey", 1.0), provider("cheap", 0.01)],
            clients,
            10.0,
            10.0,
        );
        let result = router.complete("hello world", 0.0).await.unwrap();
        assert_eq!(result.provider_id, "cheap");
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_error() {
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert("broken".into(), Arc::new(FailingModelClient::new("broken")));
        clients.insert("backup".into(), Arc::new(MockModelClient::new("backup", "from backup")));
        let router = router_no_cache(
            vec![provider("broken", 0.01), provider("backup", 0.02)],
            clients,
            10.0,
            10.0,
        );
        let result = router.complete("hello world", 0.0).await.unwrap();
        assert_eq!(result.provider_id, "backup");
        assert_eq!(router.metrics().await.fallbacks, 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_rejects_further_calls() {
        // cost_per_token=0.01, "one two three four" = 4 tokens => $0.04/call.
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert("m1".into(), Arc::new(MockModelClient::new("m1", "resp")));
        let router = router_no_cache(vec![provider("m1", 0.01)], clients, 1.0, 0.10);

        let r1 = router.complete("one two three four", 0.0).await;
        assert!(r1.is_ok());
        let r2 = router.complete("one two three four", 0.0).await;
        assert!(r2.is_ok());
        assert!((router.remaining_budget().await - 0.02).abs() < 1e-9);

        let r3 = router.complete("one two three four", 0.0).await;
        assert!(matches!(r3, Err(OrchestratorError::BudgetExceeded)));
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_provider_call() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let cache = Arc::new(ResponseCache::new(embedder, Duration::from_secs(60), 100, 0.1, 0.95));
        cache.put("What is EB-1A?", "m1", 0.0, "cached answer".into()).await.unwrap();

        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert("m1".into(), Arc::new(FailingModelClient::new("m1")));
        let router = ModelRouter::new(vec![provider("m1", 0.01)], clients, Some(cache), 10.0, 10.0, 0.01);

        let result = router.complete("What is EB-1A?", 0.0).await.unwrap();
        assert!(result.cached);
        assert_eq!(result.text, "cached answer");
    }

    #[tokio::test]
    async fn below_warn_threshold_disables_non_essential_features() {
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert("m1".into(), Arc::new(MockModelClient::new("m1", "resp")));
        let router = ModelRouter::new(vec![provider("m1", 0.01)], clients, None, 10.0, 0.05, 0.02);
        assert!(!router.is_essential_only());
        router.complete("one two three four", 0.0).await.unwrap();
        assert!(router.is_essential_only());
    }
}
