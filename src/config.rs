use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

pub const TOKEN_VAR: &str = "DISCORD_BOT_TOKEN";
pub const GUILD_VAR: &str = "DISCORD_GUILD_ID";
pub const PORT_VAR: &str = "PORT";
pub const API_URL_VAR: &str = "QUOTE_API_URL";
pub const API_TIMEOUT_VAR: &str = "QUOTE_API_TIMEOUT_SECS";
pub const ROLES_VAR: &str = "ALLOWED_ROLE_IDS";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Guild to publish commands to. Commands go global when unset.
    #[serde(default)]
    pub guild_id: Option<u64>,
}

// Keeps the token out of log lines.
impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    #[serde(default = "default_allowed_role_ids")]
    pub allowed_role_ids: BTreeSet<u64>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_role_ids: default_allowed_role_ids(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.quotable.io/random".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_allowed_role_ids() -> BTreeSet<u64> {
    BTreeSet::from([1405292890049216543, 987654321098765432])
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            ),
            None => None,
        };

        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from file contents and an environment lookup.
    /// Environment values win over the file; empty values count as unset.
    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = match file {
            Some(content) => toml::from_str(content).context("Failed to parse config file")?,
            None => Config::default(),
        };

        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = env(TOKEN_VAR) {
            config.discord.bot_token = token;
        }
        if let Some(raw) = env(GUILD_VAR) {
            config.discord.guild_id = Some(parse_var(GUILD_VAR, &raw)?);
        }
        if let Some(url) = env(API_URL_VAR) {
            config.api.endpoint = url;
        }
        if let Some(raw) = env(API_TIMEOUT_VAR) {
            config.api.timeout_secs = parse_var(API_TIMEOUT_VAR, &raw)?;
        }
        if let Some(raw) = env(ROLES_VAR) {
            config.access.allowed_role_ids = parse_role_ids(&raw)?;
        }
        if let Some(raw) = env(PORT_VAR) {
            config.server.port = parse_var(PORT_VAR, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            bail!("{TOKEN_VAR} environment variable not found");
        }
        if self.discord.guild_id == Some(0) {
            bail!("{GUILD_VAR} must be a non-zero guild id");
        }
        if self.api.timeout_secs == 0 {
            bail!("{API_TIMEOUT_VAR} must be at least 1 second");
        }
        if self.access.allowed_role_ids.is_empty() {
            tracing::warn!("No allowed role ids configured; /callapi will deny everyone");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Invalid value for {name}: {raw:?}"))
}

/// Parse a comma/space separated list of role ids.
fn parse_role_ids(raw: &str) -> Result<BTreeSet<u64>> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_var::<u64>(ROLES_VAR, s))
        .collect()
}
