//! Typed configuration records for every orchestrator component (spec §6).
//!
//! Each struct has a `Default` impl so components can run standalone in tests;
//! `Settings::from_env` overlays process environment variables (already merged
//! by [`crate::load_and_apply`]) onto the defaults.

use std::collections::HashMap;
use std::time::Duration;

/// Memory subsystem config (C2-C6).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub semantic_index_url: Option<String>,
    pub episodic_store_url: Option<String>,
    pub working_memory_buffer_size: usize,
    pub pinned_slot_names: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_model: "test-embedder-v1".to_string(),
            embedding_dimension: 32,
            semantic_index_url: None,
            episodic_store_url: None,
            working_memory_buffer_size: 64,
            pinned_slot_names: vec!["active_case_id".to_string(), "intake_state".to_string()],
        }
    }
}

/// Which backend `Orchestrator::init` wires the workflow-state store to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StateBackend {
    /// In-process map; state does not survive a restart. Default, fits
    /// tests and single-node demos.
    #[default]
    InMemory,
    /// SQLite file at the given path; state survives a restart.
    Sqlite(std::path::PathBuf),
}

/// Workflow engine config (C8-C9).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_threads: usize,
    pub max_retries_per_node: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub default_human_gate_timeout: Duration,
    pub state_ttl: Duration,
    pub state_backend: StateBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_threads: 64,
            max_retries_per_node: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            default_human_gate_timeout: Duration::from_secs(300),
            state_ttl: Duration::from_secs(24 * 60 * 60),
            state_backend: StateBackend::InMemory,
        }
    }
}

/// Response cache config (C7).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub temperature_cacheable_ceiling: f32,
    pub l2_similarity_threshold: f32,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature_cacheable_ceiling: 0.1,
            l2_similarity_threshold: 0.95,
            ttl: Duration::from_secs(60 * 60),
            max_entries: 10_000,
        }
    }
}

/// Dispatch/authorization config (C10).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// role -> allowed action names.
    pub role_permission_matrix: HashMap<String, Vec<String>>,
    pub injection_detector_enabled: bool,
    pub injection_confidence_threshold: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let mut matrix = HashMap::new();
        matrix.insert(
            "user".to_string(),
            vec![
                "ask".to_string(),
                "case_create".to_string(),
                "case_get".to_string(),
                "case_active".to_string(),
                "memory_lookup".to_string(),
                "intake_start".to_string(),
                "intake_answer".to_string(),
                "intake_skip".to_string(),
                "intake_status".to_string(),
                "intake_cancel".to_string(),
                "intake_resume".to_string(),
                "generate_letter".to_string(),
                "generate_petition".to_string(),
                "upload_exhibit".to_string(),
                "pause".to_string(),
                "resume".to_string(),
                "get_preview".to_string(),
                "download_pdf".to_string(),
            ],
        );
        matrix.insert("admin".to_string(), matrix.get("user").cloned().unwrap());
        Self {
            role_permission_matrix: matrix,
            injection_detector_enabled: true,
            injection_confidence_threshold: 0.6,
        }
    }
}

/// One model routing provider entry (C15).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub cost_per_token: f64,
    pub token_limit: u32,
    pub supports_chat: bool,
    pub supports_embed: bool,
}

/// Model routing + budget config (C15).
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub providers: Vec<ProviderConfig>,
    pub per_request_budget: f64,
    pub global_budget: f64,
    pub warn_threshold: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig {
                id: "mock".to_string(),
                cost_per_token: 0.0,
                token_limit: 8192,
                supports_chat: true,
                supports_embed: true,
            }],
            per_request_budget: 1.0,
            global_budget: 100.0,
            warn_threshold: 5.0,
        }
    }
}

/// Logging/trace/metrics sinks (ambient; consumed by `tracing` init in binaries).
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    pub metrics_sink: Option<String>,
    pub trace_exporter: Option<String>,
    pub log_sink: Option<String>,
}

/// Top-level settings bundle handed to `orchestrator::Orchestrator::init`.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub memory: MemoryConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub dispatch: DispatchConfig,
    pub routing: RoutingConfig,
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Builds settings from defaults, overlaying a few well-known environment
    /// variables when present (mirrors the teacher's "existing env wins" rule).
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(v) = std::env::var("ORCHESTRATOR_EMBEDDING_DIMENSION") {
            if let Ok(n) = v.parse() {
                settings.memory.embedding_dimension = n;
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_GLOBAL_BUDGET") {
            if let Ok(n) = v.parse() {
                settings.routing.global_budget = n;
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_INJECTION_THRESHOLD") {
            if let Ok(n) = v.parse() {
                settings.dispatch.injection_confidence_threshold = n;
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_internally_consistent() {
        let s = Settings::default();
        assert!(s.memory.embedding_dimension > 0);
        assert!(s.cache.l2_similarity_threshold <= 1.0);
        assert!(s
            .dispatch
            .role_permission_matrix
            .contains_key("user"));
    }

    #[test]
    fn from_env_overlays_known_keys() {
        std::env::set_var("ORCHESTRATOR_GLOBAL_BUDGET", "42.5");
        let s = Settings::from_env();
        std::env::remove_var("ORCHESTRATOR_GLOBAL_BUDGET");
        assert_eq!(s.routing.global_budget, 42.5);
    }
}
