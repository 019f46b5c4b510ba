//! Agent configuration.

use clap::Parser;
use logspy_session::{DEFAULT_MAX_DEPTH, SessionConfig};
use logspy_transport::BackoffPolicy;

/// Backend used when the agent is enabled without an explicit URL.
pub const DEFAULT_BASE_URL: &str = "wss://api.logspy.dev";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("accessToken is required")]
    MissingAccessToken,
    #[error("appName is required")]
    MissingAppName,
}

/// Command-line flags, each also readable from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "logspy", author, version, about, long_about = None)]
pub struct AgentArgs {
    /// Backend access token
    #[arg(long, env = "LOGSPY_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    pub access_token: String,

    /// Name the application reports to the backend
    #[arg(long, env = "LOGSPY_APP_NAME", default_value = "")]
    pub app_name: String,

    /// Backend URL; setting it enables the agent in any environment
    #[arg(long, env = "LOGSPY_BASE_URL")]
    pub base_url: Option<String>,

    /// V8 inspector WebSocket of the monitored process
    #[arg(long, env = "LOGSPY_INSPECTOR_URL", default_value = "ws://127.0.0.1:9229")]
    pub inspector_url: String,

    /// Deployment environment
    #[arg(long, env = "LOGSPY_ENV", default_value = "development")]
    pub environment: String,

    /// Sources the debuggee never pauses in (comma separated)
    #[arg(long = "blackbox", env = "LOGSPY_BLACKBOX_PATTERNS", value_delimiter = ',')]
    pub blackbox_patterns: Vec<String>,

    /// Nesting levels captured per logpoint hit
    #[arg(long, env = "LOGSPY_MAX_DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Consecutive reconnect attempts before the stream restarts
    #[arg(long, env = "LOGSPY_MAX_RETRIES", default_value_t = 10)]
    pub max_retries: u32,

    /// Stream restarts before the agent gives up (unbounded if unset)
    #[arg(long, env = "LOGSPY_MAX_RESTARTS")]
    pub max_restarts: Option<u32>,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub access_token: String,
    pub app_name: String,
    pub base_url: Option<String>,
    pub inspector_url: String,
    pub environment: String,
    pub blackbox_patterns: Vec<String>,
    pub max_depth: usize,
    pub backoff: BackoffPolicy,
    pub max_restarts: Option<u32>,
}

impl AgentConfig {
    #[must_use]
    pub fn new(access_token: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            app_name: app_name.into(),
            base_url: None,
            inspector_url: "ws://127.0.0.1:9229".to_string(),
            environment: "development".to_string(),
            blackbox_patterns: SessionConfig::default().blackbox_patterns,
            max_depth: DEFAULT_MAX_DEPTH,
            backoff: BackoffPolicy::default(),
            max_restarts: None,
        }
    }

    /// Check the required fields.
    ///
    /// # Errors
    /// Returns error if the access token or the app name is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::MissingAccessToken);
        }
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::MissingAppName);
        }
        Ok(())
    }

    /// The agent only runs in production-like environments, unless a
    /// backend URL was given explicitly.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
            || matches!(
                self.environment.to_ascii_lowercase().as_str(),
                "production" | "prod"
            )
    }

    #[must_use]
    pub fn backend_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            blackbox_patterns: self.blackbox_patterns.clone(),
            max_depth: self.max_depth,
        }
    }
}

impl From<AgentArgs> for AgentConfig {
    fn from(args: AgentArgs) -> Self {
        let blackbox_patterns = if args.blackbox_patterns.is_empty() {
            SessionConfig::default().blackbox_patterns
        } else {
            args.blackbox_patterns
        };
        Self {
            access_token: args.access_token,
            app_name: args.app_name,
            base_url: args.base_url.filter(|url| !url.is_empty()),
            inspector_url: args.inspector_url,
            environment: args.environment,
            blackbox_patterns,
            max_depth: args.max_depth,
            backoff: BackoffPolicy {
                max_retries: args.max_retries,
                ..BackoffPolicy::default()
            },
            max_restarts: args.max_restarts,
        }
    }
}
