//! Persisted config (crawl root, models, chunking and retrieval defaults) in
//! the app data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{DEFAULT_MAX_CHARS, DEFAULT_OVERLAP};
use crate::ollama::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBED_DIMENSION, DEFAULT_EMBED_MODEL,
    DEFAULT_MAX_INPUT_CHARS,
};
use crate::throttle::{DEFAULT_MAX_RETRIES, DEFAULT_REQUESTS_PER_MINUTE};

const CONFIG_FILENAME: &str = "config.toml";
const SNAPSHOT_FILENAME: &str = "snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding crawled page dumps.
    pub crawl_root: Option<String>,
    /// Where the store snapshot lives. Defaults to the app data directory.
    pub snapshot_path: Option<String>,
    pub ollama_url: String,
    pub embed_model: String,
    /// Must match the output size of `embed_model`.
    pub embed_dimension: usize,
    pub max_input_chars: usize,
    pub chat_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Completion calls allowed per minute. 0 means unlimited.
    pub llm_requests_per_minute: u32,
    /// Retries after a failed completion call.
    pub llm_max_retries: u32,
    /// Generate a summary per chunk on ingest and answer from summaries.
    pub use_summaries: bool,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawl_root: None,
            snapshot_path: None,
            ollama_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            embed_dimension: DEFAULT_EMBED_DIMENSION,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            chunk_size: DEFAULT_MAX_CHARS,
            chunk_overlap: DEFAULT_OVERLAP,
            top_k: 3,
            min_score: None,
            temperature: 0.7,
            max_tokens: 1024,
            llm_requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            llm_max_retries: DEFAULT_MAX_RETRIES,
            use_summaries: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// `[logging]` section. `RUST_LOG` takes precedence over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug or trace.
    pub default: String,
    /// Per-target overrides, e.g. `crawlrag_core = "debug"`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: "warn".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string, e.g. `warn,crawlrag_core=debug`.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.default.clone();
        for (module, level) in &self.modules {
            filter.push_str(&format!(",{module}={level}"));
        }
        filter
    }
}

impl Config {
    /// Configured crawl root path, if any.
    pub fn crawl_root(&self) -> Option<PathBuf> {
        self.crawl_root.as_deref().filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    /// Configured snapshot path, else `snapshot.json` in the app data directory.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        match self.snapshot_path.as_deref().filter(|s| !s.is_empty()) {
            Some(p) => Some(PathBuf::from(p)),
            None => app_data::app_data_dir().map(|d| d.join(SNAPSHOT_FILENAME)),
        }
    }
}

/// Parse config TOML. Missing fields take their defaults.
pub fn parse_config(s: &str) -> Result<Config, ConfigError> {
    toml::from_str(s).map_err(ConfigError::Parse)
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    let path = data_dir.join(CONFIG_FILENAME);
    let Ok(s) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    parse_config(&s).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), "ignoring invalid config: {e}");
        Config::default()
    })
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    let path = data_dir.join(CONFIG_FILENAME);
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

/// Set and persist the crawl root.
pub fn set_crawl_root(path: &Path) -> Result<(), ConfigError> {
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let mut config = load_config();
    config.crawl_root = Some(path.to_string_lossy().into_owned());
    save_config(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let c = parse_config("").unwrap();
        assert_eq!(c.chunk_size, DEFAULT_MAX_CHARS);
        assert_eq!(c.embed_dimension, DEFAULT_EMBED_DIMENSION);
        assert_eq!(c.logging.default, "warn");
        assert!(c.min_score.is_none());
        assert_eq!(c.llm_requests_per_minute, 60);
        assert_eq!(c.llm_max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let c = parse_config(
            r#"
            chunk_size = 1000
            min_score = 0.4
            llm_requests_per_minute = 10

            [logging]
            default = "info"

            [logging.modules]
            crawlrag_core = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(c.chunk_size, 1000);
        assert_eq!(c.chunk_overlap, DEFAULT_OVERLAP);
        assert_eq!(c.min_score, Some(0.4));
        assert_eq!(c.llm_requests_per_minute, 10);
        assert_eq!(c.logging.filter_directive(), "info,crawlrag_core=debug");
    }

    #[test]
    fn invalid_config_is_an_error() {
        assert!(matches!(parse_config("chunk_size = \"big\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn serialized_default_parses_back() {
        let s = toml::to_string_pretty(&Config::default()).unwrap();
        let c = parse_config(&s).unwrap();
        assert_eq!(c.ollama_url, DEFAULT_BASE_URL);
        assert_eq!(c.top_k, 3);
    }

    #[test]
    fn explicit_snapshot_path_wins() {
        let c = Config {
            snapshot_path: Some("/tmp/crawl/store.yaml".to_string()),
            ..Config::default()
        };
        assert_eq!(c.snapshot_path(), Some(PathBuf::from("/tmp/crawl/store.yaml")));
    }
}
