//! logspy agent.
//!
//! Provides:
//! - `AgentConfig` - validated configuration, loadable from flags and environment
//! - `init` - launch the agent on its own thread, returning an `AgentHandle`
//! - `supervise` - keep the command stream alive around a debug session

pub mod agent;
pub mod config;

pub use agent::{AgentError, AgentHandle, init, run, supervise};
pub use config::{AgentArgs, AgentConfig, ConfigError, DEFAULT_BASE_URL};
