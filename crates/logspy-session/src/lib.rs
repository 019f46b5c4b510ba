//! Debug session management for the logspy agent.
//!
//! Provides:
//! - `DebugSession` - attach to a debuggee and serve the command set
//! - `ScriptRegistry` / `LogpointTable` - session-scoped indexes
//! - `Snapshotter` - depth-bounded capture of live objects

pub mod logpoints;
pub mod pause;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use logpoints::{Logpoint, LogpointTable};
pub use pause::{PauseOutcome, PauseState};
pub use registry::ScriptRegistry;
pub use session::{DebugSession, SessionConfig, SessionError};
pub use snapshot::{DEFAULT_MAX_DEPTH, Snapshotter};
