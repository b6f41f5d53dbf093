use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::Category;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_root")]
    pub root: PathBuf,
    /// Extra directory-name → category routes, e.g. `ada = "clinical_guidelines"`.
    #[serde(default)]
    pub category_dirs: HashMap<String, Category>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: default_registry_root(),
            category_dirs: HashMap::new(),
        }
    }
}

fn default_registry_root() -> PathBuf {
    PathBuf::from("./data/sources")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_search_max_entries")]
    pub search_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            search_max_entries: default_search_max_entries(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache/uploads")
}
fn default_search_max_entries() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

fn default_provider_kind() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_attempts() -> u32 {
    30
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Below this confidence, secondary categories join the search set.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_classifier_temperature")]
    pub temperature: f32,
    #[serde(default = "default_classifier_max_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            temperature: default_classifier_temperature(),
            max_output_tokens: default_classifier_max_tokens(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_classifier_temperature() -> f32 {
    0.1
}
fn default_classifier_max_tokens() -> u32 {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_kb_collection")]
    pub knowledge_base_collection: String,
    #[serde(default = "default_kb_k")]
    pub knowledge_base_k: usize,
    /// Pre-embedded chunk file loaded into the in-memory vector index.
    #[serde(default)]
    pub knowledge_base_index: Option<PathBuf>,
    #[serde(default = "default_retrieval_temperature")]
    pub temperature: f32,
    #[serde(default = "default_retrieval_max_tokens")]
    pub max_output_tokens: u32,
    /// Overall fan-out budget. Unset means wait for every source.
    #[serde(default)]
    pub request_budget_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            knowledge_base_collection: default_kb_collection(),
            knowledge_base_k: default_kb_k(),
            knowledge_base_index: None,
            temperature: default_retrieval_temperature(),
            max_output_tokens: default_retrieval_max_tokens(),
            request_budget_secs: None,
        }
    }
}

fn default_kb_collection() -> String {
    "knowledge_base".to_string()
}
fn default_kb_k() -> usize {
    5
}
fn default_retrieval_temperature() -> f32 {
    0.1
}
fn default_retrieval_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_max_context_results")]
    pub max_context_results: usize,
    #[serde(default = "default_synthesis_temperature")]
    pub temperature: f32,
    #[serde(default = "default_synthesis_max_tokens")]
    pub max_output_tokens: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            max_context_results: default_max_context_results(),
            temperature: default_synthesis_temperature(),
            max_output_tokens: default_synthesis_max_tokens(),
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.35
}
fn default_max_context_results() -> usize {
    20
}
fn default_synthesis_temperature() -> f32 {
    0.3
}
fn default_synthesis_max_tokens() -> u32 {
    2048
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.classifier.confidence_threshold) {
        anyhow::bail!("classifier.confidence_threshold must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.synthesis.confidence_floor) {
        anyhow::bail!("synthesis.confidence_floor must be in [0.0, 1.0]");
    }

    if config.synthesis.max_context_results == 0 {
        anyhow::bail!("synthesis.max_context_results must be >= 1");
    }

    if config.retrieval.knowledge_base_k == 0 {
        anyhow::bail!("retrieval.knowledge_base_k must be >= 1");
    }

    if config.retrieval.request_budget_secs == Some(0) {
        anyhow::bail!("retrieval.request_budget_secs must be >= 1 when set");
    }

    if config.provider.max_poll_attempts == 0 {
        anyhow::bail!("provider.max_poll_attempts must be >= 1");
    }

    match config.provider.kind.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(())
}
