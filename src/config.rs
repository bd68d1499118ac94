use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_CONFIG: &str = r#"# sitechat default configuration
[server]
host = "127.0.0.1"
port = 8501

[scraper]
proxy_base = "https://r.jina.ai/"
user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
max_content_chars = 15000

[llm]
api_base = "https://api.openai.com/v1"
model = "gpt-3.5-turbo"
api_key_env = "OPENAI_API_KEY"

[session]
# "environment" reads the key from `llm.api_key_env` at startup,
# "interactive" expects each session to supply one.
credentials = "environment"
duplicate_policy = "guarded"
idle_timeout_secs = 3600
"#;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 15_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_proxy_base")]
    pub proxy_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Unset means requests may take as long as the proxy needs.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            proxy_base: default_proxy_base(),
            user_agent: default_user_agent(),
            max_content_chars: default_max_content_chars(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub credentials: CredentialMode,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Sessions untouched for this long are dropped along with their key.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialMode::default(),
            duplicate_policy: DuplicatePolicy::default(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Where a session's API key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    #[default]
    Environment,
    Interactive,
}

/// Whether resubmitting the question that produced the latest answer starts a new turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Guarded,
    Unguarded,
}

fn default_proxy_base() -> String {
    "https://r.jina.ai/".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_content_chars() -> usize {
    DEFAULT_MAX_CONTENT_CHARS
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

impl Config {
    pub fn load_auto() -> Result<Self> {
        if let Ok(path) = env::var("SITECHAT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load(&path);
            } else {
                tracing::warn!("SITECHAT_CONFIG points to non-existent file: {}", path.display());
            }
        }

        Self::load_from_user_config()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let cfg = Self::from_toml(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).context("Failed to parse TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_user_config() -> Result<Self> {
        let path = Self::ensure_user_config_exists()?;
        Self::load(&path)
    }

    fn user_config_path() -> Result<PathBuf> {
        let home = env::var("HOME").context("HOME env var not set")?;
        Ok(Path::new(&home)
            .join(".config")
            .join("sitechat")
            .join("config.toml"))
    }

    fn ensure_user_config_exists() -> Result<PathBuf> {
        let path = Self::user_config_path()?;
        write_default_if_missing(&path)?;
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scraper.max_content_chars == 0 {
            bail!("scraper.max_content_chars must be greater than zero");
        }
        require_http_url("scraper.proxy_base", &self.scraper.proxy_base)?;
        require_http_url("llm.api_base", &self.llm.api_base)?;
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.llm.api_key_env.trim().is_empty() {
            bail!("llm.api_key_env must not be empty");
        }
        if self.session.idle_timeout_secs == 0 {
            bail!("session.idle_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

fn write_default_if_missing(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        }
    }
    if !path.exists() {
        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        tracing::info!("Wrote default config to {}", path.display());
    }
    Ok(())
}

fn require_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", field, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got {}", field, other),
    }
}
