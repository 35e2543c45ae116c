//! Configuration vault – reads/writes `~/.strata/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strata_memory::ChunkConfig;
use zeroize::Zeroize;

/// Persisted user configuration stored in `~/.strata/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the chunk store (tiers and archive).
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Token budget for `/context`.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Use the model server for summaries and embeddings.  When `false`,
    /// heuristic summaries are used and retrieval falls back to recency.
    #[serde(default)]
    pub use_providers: bool,

    /// Base URL of the OpenAI-compatible / Ollama server.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Chat model used for summarisation (e.g. "llama3").
    #[serde(default = "default_model")]
    pub model: String,

    /// Ollama embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Bearer token for hosted endpoints.  Stored as plain text; the file is
    /// written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    #[serde(default)]
    pub chunking: ChunkConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_dir", &self.store_dir)
            .field("context_tokens", &self.context_tokens)
            .field("use_providers", &self.use_providers)
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("chunking", &self.chunking)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(home_dir()).join(".strata").join("store")
}
fn default_context_tokens() -> usize {
    4000
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            context_tokens: default_context_tokens(),
            use_providers: false,
            llm_url: default_llm_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            api_key: String::new(),
            chunking: ChunkConfig::default(),
        }
    }
}

/// Return the path to `~/.strata/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strata").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
/// `STRATA_*` environment overrides are applied on top of the file.
pub fn load() -> Result<Option<Config>, String> {
    let Some(mut cfg) = load_from(&config_path())? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.chunking
        .validate()
        .map_err(|e| format!("Invalid [chunking] section: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `STRATA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRATA_STORE_DIR` | `store_dir` |
/// | `STRATA_LLM_URL` | `llm_url` |
/// | `STRATA_MODEL` | `model` |
/// | `STRATA_EMBED_MODEL` | `embedding_model` |
/// | `STRATA_CONTEXT_TOKENS` | `context_tokens` |
/// | `STRATA_API_KEY` | `api_key` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STRATA_STORE_DIR") {
        cfg.store_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("STRATA_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("STRATA_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("STRATA_EMBED_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("STRATA_CONTEXT_TOKENS")
        && let Ok(tokens) = v.parse::<usize>()
    {
        cfg.context_tokens = tokens;
    }
    if let Ok(v) = std::env::var("STRATA_API_KEY") {
        cfg.api_key = v;
    }
}

/// Save the config to disk, creating `~/.strata/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
