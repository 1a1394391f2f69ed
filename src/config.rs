use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Cinema site base URL (detail-page hrefs are relative to it)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Programme listing URL; the DD-MM-YYYY date is appended
    #[serde(default = "default_programme_url")]
    pub programme_url: String,

    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Ollama-compatible model service URL
    #[serde(default = "default_model_url")]
    pub model_url: String,

    /// Chat model used for description translation
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Timeout for page navigation / selector waits, in seconds
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    /// Maximum concurrent translate+embed tasks
    #[serde(default = "default_max_concurrent_embeddings")]
    pub max_concurrent_embeddings: usize,
}

fn default_base_url() -> String {
    "https://www.kinonh.pl/".to_string()
}

fn default_programme_url() -> String {
    "https://www.kinonh.pl/#repertuar@".to_string()
}

fn default_db_path() -> String {
    match dirs_config_dir() {
        Some(dir) => format!("{}/kinoplan/kinoplan.db", dir),
        None => "kinoplan.db".to_string(),
    }
}

fn dirs_config_dir() -> Option<String> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .or_else(|| std::env::var("HOME").ok().map(|h| format!("{}/.config", h)))
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_chat_model() -> String {
    "llama3.2".to_string()
}

fn default_embed_model() -> String {
    "mxbai-embed-large".to_string()
}

fn default_nav_timeout_secs() -> u64 {
    5
}

fn default_max_concurrent_embeddings() -> usize {
    2
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::prefixed("KINOPLAN_")
            .from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}
