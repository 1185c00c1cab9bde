// Configuration Storage Service
// Handles audit engine config file read/write

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub version: String,
    pub default_provider: Option<String>,
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub enabled: bool,
    pub http: Option<String>,
    pub https: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    #[serde(default = "default_judge_provider")]
    pub judge_provider: String,
    #[serde(default = "default_judge_model")]
    pub judge_model: String,
    #[serde(default = "default_mode")]
    pub default_mode: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_utilization")]
    pub utilization_factor: f64,
    #[serde(default)]
    pub sub_audit_enabled: bool,
    #[serde(default = "default_strict_retention_min")]
    pub strict_retention_min: f64,
    #[serde(default = "default_strict_retention_max")]
    pub strict_retention_max: f64,
    #[serde(default = "default_condensed_retention_min")]
    pub condensed_retention_min: f64,
    #[serde(default = "default_strict_score_floor")]
    pub strict_pass_score_floor: f64,
    #[serde(default = "default_condensed_score_floor")]
    pub condensed_pass_score_floor: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            judge_provider: default_judge_provider(),
            judge_model: default_judge_model(),
            default_mode: default_mode(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            utilization_factor: default_utilization(),
            sub_audit_enabled: false,
            strict_retention_min: default_strict_retention_min(),
            strict_retention_max: default_strict_retention_max(),
            condensed_retention_min: default_condensed_retention_min(),
            strict_pass_score_floor: default_strict_score_floor(),
            condensed_pass_score_floor: default_condensed_score_floor(),
        }
    }
}

fn default_judge_provider() -> String { "openai".to_string() }
fn default_judge_model() -> String { "gpt-4o".to_string() }
fn default_mode() -> String { "strict-fidelity".to_string() }
fn default_max_workers() -> usize { 4 }
fn default_max_retries() -> usize { 5 }
fn default_min_chunk_chars() -> usize { 8_000 }
fn default_max_chunk_chars() -> usize { 120_000 }
fn default_overlap_chars() -> usize { 1_200 }
fn default_utilization() -> f64 { 0.6 }
fn default_strict_retention_min() -> f64 { 0.95 }
fn default_strict_retention_max() -> f64 { 1.15 }
fn default_condensed_retention_min() -> f64 { 0.70 }
fn default_strict_score_floor() -> f64 { 9.0 }
fn default_condensed_score_floor() -> f64 { 8.0 }

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("auditaAI"))
    }

    pub fn ensure_dir(&self) -> Result<(), String> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| format!("Failed to create config dir: {}", e))
    }

    /// Load configuration from file; missing file yields defaults.
    pub fn load(&self) -> Result<AppConfig, String> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), String> {
        self.ensure_dir()?;

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(&self.config_file, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }

    pub fn get_api_key(&self, provider: &str) -> Result<Option<String>, String> {
        let config = self.load()?;
        Ok(config
            .api_keys
            .get(provider)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn set_api_key(&self, provider: &str, key: &str) -> Result<(), String> {
        let mut config = self.load()?;
        config.api_keys.insert(provider.to_string(), key.to_string());
        self.save(&config)
    }
}
