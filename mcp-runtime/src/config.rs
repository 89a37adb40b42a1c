use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use serde::Serialize;
use url::Url;

pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:3000/signin-oidc";
pub const DEFAULT_ISSUER_URL: &str = "https://ims.bentley.com";
pub const DEFAULT_DISCOVERY_URL: &str = "https://discover.api.seequent.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("EVO_CLIENT_ID is required")]
    MissingClientId,
    #[error("invalid tool filter '{0}' (expected one of: admin, data, all)")]
    InvalidToolFilter(String),
    #[error("EVO_IMPORT_MAX_PARALLEL must be at least 1")]
    InvalidParallelism,
    #[error("EVO_REFRESH_MARGIN_SECS is out of range: {0}")]
    InvalidRefreshMargin(u64),
    #[error("{name} is not a valid URL: '{value}'")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("local data directory {0} does not exist")]
    MissingDataDir(PathBuf),
}

/// Tool visibility grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Visible under every filter.
    General,
    Admin,
    Data,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::General => "general",
            ToolCategory::Admin => "admin",
            ToolCategory::Data => "data",
        }
    }
}

/// Which tool categories this process exposes. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFilter {
    Admin,
    Data,
    #[default]
    All,
}

impl ToolFilter {
    pub fn includes(self, category: ToolCategory) -> bool {
        match (self, category) {
            (_, ToolCategory::General) | (ToolFilter::All, _) => true,
            (ToolFilter::Admin, ToolCategory::Admin) => true,
            (ToolFilter::Data, ToolCategory::Data) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolFilter::Admin => "admin",
            ToolFilter::Data => "data",
            ToolFilter::All => "all",
        }
    }
}

impl fmt::Display for ToolFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(ToolFilter::Admin),
            "data" => Ok(ToolFilter::Data),
            "all" => Ok(ToolFilter::All),
            _ => Err(ConfigError::InvalidToolFilter(s.to_string())),
        }
    }
}

/// Connection and behaviour settings shared by every subcommand.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    /// OAuth client id registered for this application
    #[arg(long, env = "EVO_CLIENT_ID")]
    pub client_id: Option<String>,
    /// OAuth redirect URL; its host and port are used for the local callback listener
    #[arg(long, env = "EVO_REDIRECT_URL", default_value = DEFAULT_REDIRECT_URL)]
    pub redirect_url: String,
    /// Identity provider base URL
    #[arg(long, env = "EVO_ISSUER_URL", default_value = DEFAULT_ISSUER_URL)]
    pub issuer_url: String,
    /// Discovery service base URL
    #[arg(long, env = "EVO_DISCOVERY_URL", default_value = DEFAULT_DISCOVERY_URL)]
    pub discovery_url: String,
    /// Tool categories to expose: admin, data or all
    #[arg(long, env = "MCP_TOOL_FILTER")]
    pub tool_filter: Option<String>,
    /// Older name for the tool filter, used when `--tool-filter` is unset
    #[arg(long = "agent-type", env = "MCP_AGENT_TYPE", hide = true)]
    pub legacy_tool_filter: Option<String>,
    /// Explicit bearer token; disables interactive login and refresh
    #[arg(long, env = "EVO_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Refresh tokens this many seconds before they expire
    #[arg(long, env = "EVO_REFRESH_MARGIN_SECS", default_value_t = 300)]
    pub refresh_margin_secs: u64,
    /// Maximum concurrent object submissions during CSV import
    #[arg(long, env = "EVO_IMPORT_MAX_PARALLEL", default_value_t = 4)]
    pub import_max_parallel: usize,
    /// Directory searched by the local data file tools
    #[arg(long, env = "EVO_LOCAL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Directory holding persisted credentials
    #[arg(long, env = "EVO_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    pub fn into_settings(self) -> Result<RuntimeSettings, ConfigError> {
        let raw_filter = [&self.tool_filter, &self.legacy_tool_filter]
            .into_iter()
            .flatten()
            .find(|v| !v.trim().is_empty());
        let tool_filter = match raw_filter {
            Some(raw) => raw.parse()?,
            None => ToolFilter::All,
        };
        let refresh_margin = i64::try_from(self.refresh_margin_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or(ConfigError::InvalidRefreshMargin(self.refresh_margin_secs))?;
        let settings = RuntimeSettings {
            config_dir: self.config_dir(),
            client_id: self.client_id.unwrap_or_default(),
            redirect_url: parse_url("EVO_REDIRECT_URL", &self.redirect_url)?,
            issuer_url: parse_url("EVO_ISSUER_URL", &self.issuer_url)?,
            discovery_url: parse_url("EVO_DISCOVERY_URL", &self.discovery_url)?,
            tool_filter,
            explicit_token: self.token.filter(|t| !t.trim().is_empty()),
            refresh_margin,
            import_max_parallel: self.import_max_parallel,
            local_data_dir: self.data_dir,
        };
        settings.validate()?;
        Ok(settings)
    }
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evo-mcp")
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        source,
    })
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub client_id: String,
    pub redirect_url: Url,
    pub issuer_url: Url,
    pub discovery_url: Url,
    pub tool_filter: ToolFilter,
    pub explicit_token: Option<String>,
    pub refresh_margin: chrono::Duration,
    pub import_max_parallel: usize,
    pub local_data_dir: Option<PathBuf>,
    pub config_dir: PathBuf,
}

impl RuntimeSettings {
    /// Settings with defaults for everything but the client id.
    pub fn new(client_id: impl Into<String>) -> Result<Self, ConfigError> {
        ConnectionArgs {
            client_id: Some(client_id.into()),
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            refresh_margin_secs: 300,
            import_max_parallel: 4,
            ..ConnectionArgs::default()
        }
        .into_settings()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        if self.import_max_parallel == 0 {
            return Err(ConfigError::InvalidParallelism);
        }
        if let Some(dir) = &self.local_data_dir
            && !dir.is_dir()
        {
            return Err(ConfigError::MissingDataDir(dir.clone()));
        }
        Ok(())
    }

    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/connect/authorize",
            self.issuer_url.as_str().trim_end_matches('/')
        )
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/connect/token",
            self.issuer_url.as_str().trim_end_matches('/')
        )
    }
}
