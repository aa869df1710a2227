//! Configuration for corrag.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CORRAG_HOME, plus the API key variables named
//!    in the `llm` / `embeddings` sections)
//! 2. Config file (.corrag/config.yaml)
//! 3. Defaults (~/.corrag)
//!
//! Config file discovery:
//! - Searches current directory and parents for .corrag/config.yaml
//! - Paths in config file are relative to the config file's parent directory
//!
//! The resolved configuration is a plain value handed to
//! [`crate::context::AppContext`]; nothing is cached globally.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::core::WorkflowLimits;

const DASHSCOPE_COMPATIBLE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DASHSCOPE_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embeddings: EmbeddingSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub knowledge: KnowledgeSettings,
    #[serde(default)]
    pub workflow: WorkflowLimits,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .corrag/ directory)
    pub home: Option<String>,
}

/// Chat model used for classification and generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL
    pub base_url: String,
    pub model: String,
    /// Name of the env var holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Bound on concurrent requests across all runs (unbounded if unset)
    pub max_concurrent_requests: Option<usize>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_COMPATIBLE_URL.to_string(),
            model: "qwen-plus".to_string(),
            api_key_env: DASHSCOPE_KEY_ENV.to_string(),
            temperature: 0.0,
            timeout_seconds: 120,
            max_concurrent_requests: None,
        }
    }
}

/// Embedding model used to build and query the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    /// Inputs per request
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_COMPATIBLE_URL.to_string(),
            model: "text-embedding-v2".to_string(),
            api_key_env: DASHSCOPE_KEY_ENV.to_string(),
            batch_size: 25,
            timeout_seconds: 60,
        }
    }
}

/// Web search backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    /// Snippets kept from one search
    pub max_results: usize,
    pub timeout_seconds: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.duckduckgo.com/".to_string(),
            max_results: 5,
            timeout_seconds: 30,
        }
    }
}

/// Knowledge base build and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSettings {
    /// Name of the persisted collection
    pub collection: String,
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
    /// Split points, highest priority first; "" splits per character
    pub separators: Vec<String>,
    /// Documents returned per retrieval
    pub top_k: usize,
    /// File globs expanded inside directory sources
    pub patterns: Vec<String>,
    /// Paths matching these globs are never ingested
    pub denylist: Vec<String>,
    /// Sources used by `build` when none are given on the command line
    pub sources: Vec<PathBuf>,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            collection: "internal_docs".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", "，", " ", ""]
                .into_iter()
                .map(String::from)
                .collect(),
            top_k: 3,
            patterns: ["**/*.md", "**/*.markdown", "**/*.txt", "**/*.rst", "**/*.pdf"]
                .into_iter()
                .map(String::from)
                .collect(),
            denylist: [
                "**/.env*",
                "**/secrets*",
                "**/secrets/**",
                "**/*credential*",
                "**/*.pem",
                "**/*.key",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sources: Vec::new(),
        }
    }
}

impl KnowledgeSettings {
    /// Check if a path matches any denylist pattern
    ///
    /// `path` is relative to the source it was found under; `*` never
    /// crosses a `/`, so only `**` spans directories.
    pub fn is_denylisted(&self, path: &str) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };
        self.denylist
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|pattern| pattern.matches_with(path, options))
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to corrag home (run logs, knowledge base)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub llm: LlmSettings,
    pub embeddings: EmbeddingSettings,
    pub search: SearchSettings,
    pub knowledge: KnowledgeSettings,
    pub workflow: WorkflowLimits,
}

impl ResolvedConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let env_home = std::env::var_os("CORRAG_HOME").map(PathBuf::from);
        resolve(find_config_file(), env_home)
    }

    /// Defaults rooted at `home`, ignoring any config file
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config_file: None,
            llm: LlmSettings::default(),
            embeddings: EmbeddingSettings::default(),
            search: SearchSettings::default(),
            knowledge: KnowledgeSettings::default(),
            workflow: WorkflowLimits::default(),
        }
    }

    /// Recorded run transcripts ($CORRAG_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Persisted knowledge base ($CORRAG_HOME/knowledge.db)
    pub fn knowledge_db_path(&self) -> PathBuf {
        self.home.join("knowledge.db")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".corrag").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve(config_file: Option<PathBuf>, env_home: Option<PathBuf>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".corrag"))
    };

    let Some(config_path) = config_file else {
        let home = match env_home {
            Some(home) => home,
            None => default_home()?,
        };
        return Ok(ResolvedConfig::with_home(home));
    };

    let config = load_config_file(&config_path)?;

    // .corrag/ directory and the project root above it
    let corrag_dir = config_path.parent().unwrap_or(Path::new("."));
    let base_dir = corrag_dir.parent().unwrap_or(Path::new("."));

    let home = match (env_home, &config.paths.home) {
        (Some(home), _) => home,
        (None, Some(home_path)) => resolve_path(corrag_dir, home_path),
        (None, None) => default_home()?,
    };

    let mut knowledge = config.knowledge;
    knowledge.sources = knowledge
        .sources
        .iter()
        .map(|source| resolve_path(base_dir, &source.to_string_lossy()))
        .collect();

    Ok(ResolvedConfig {
        home,
        config_file: Some(config_path),
        llm: config.llm,
        embeddings: config.embeddings,
        search: config.search,
        knowledge,
        workflow: config.workflow,
    })
}
