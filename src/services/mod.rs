// Services Module
// Core services for the fidelity audit engine

pub mod audit;
pub mod config_store;
pub mod metrics;
pub mod providers;
pub mod references;

// Re-export main service interfaces
pub use audit::{AuditEngine, AuditError, SourceAttribution};
pub use config_store::{AppConfig, AuditConfig, ConfigStore, ProxyConfig};
pub use metrics::{compute_metrics, count_words};
pub use providers::{
    context_tokens_for, get_api_key, parse_provider, Judge, JudgeClient, LiveJudge, ProviderError,
};
pub use references::extract_references;
