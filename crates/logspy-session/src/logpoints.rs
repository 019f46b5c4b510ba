//! Logpoint table.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use logspy_core::{BreakpointId, Debuggee, Location, ScriptId};
use serde::{Deserialize, Serialize};

use crate::session::SessionError;

/// A breakpoint installed to capture state and continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Logpoint {
    pub breakpoint_id: BreakpointId,
    /// Location the caller asked for.
    pub requested: Location,
    /// Location the debuggee snapped the breakpoint to.
    pub actual_location: Location,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<BreakpointId, Logpoint>,
    by_line: HashMap<(ScriptId, u32), Vec<BreakpointId>>,
}

/// Logpoints owned by one session, keyed by breakpoint id and by requested line.
#[derive(Default)]
pub struct LogpointTable {
    inner: RwLock<Inner>,
}

impl LogpointTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a breakpoint at `location` and record it.
    ///
    /// Not idempotent: adding the same location twice installs two breakpoints.
    ///
    /// # Errors
    /// Returns error if the debuggee rejects the breakpoint.
    pub async fn add<D>(&self, debuggee: &D, location: Location) -> Result<Logpoint, SessionError>
    where
        D: Debuggee + ?Sized,
    {
        let placement = debuggee.set_breakpoint(&location).await?;
        let logpoint = Logpoint {
            breakpoint_id: placement.breakpoint_id,
            requested: location,
            actual_location: placement.actual_location,
        };

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_line
            .entry((
                logpoint.requested.script_id.clone(),
                logpoint.requested.line_number,
            ))
            .or_default()
            .push(logpoint.breakpoint_id.clone());
        inner
            .by_id
            .insert(logpoint.breakpoint_id.clone(), logpoint.clone());

        tracing::debug!(
            breakpoint_id = %logpoint.breakpoint_id,
            script_id = %logpoint.actual_location.script_id,
            line = logpoint.actual_location.line_number,
            "logpoint added"
        );
        Ok(logpoint)
    }

    /// Remove a breakpoint from the debuggee and forget it.
    ///
    /// # Errors
    /// Returns `LogpointNotFound` for an id this table does not hold, or the
    /// debuggee's error (the entry is kept in that case).
    pub async fn remove<D>(&self, debuggee: &D, breakpoint_id: &str) -> Result<Logpoint, SessionError>
    where
        D: Debuggee + ?Sized,
    {
        if !self.contains(breakpoint_id) {
            return Err(SessionError::LogpointNotFound(breakpoint_id.to_string()));
        }

        debuggee.remove_breakpoint(breakpoint_id).await?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let logpoint = inner
            .by_id
            .remove(breakpoint_id)
            .ok_or_else(|| SessionError::LogpointNotFound(breakpoint_id.to_string()))?;

        let key = (
            logpoint.requested.script_id.clone(),
            logpoint.requested.line_number,
        );
        if let Some(ids) = inner.by_line.get_mut(&key) {
            ids.retain(|id| id != breakpoint_id);
            if ids.is_empty() {
                inner.by_line.remove(&key);
            }
        }

        tracing::debug!(%breakpoint_id, "logpoint removed");
        Ok(logpoint)
    }

    /// Whether any of the breakpoints reported at a pause belongs to this table.
    #[must_use]
    pub fn is_hit(&self, hit_breakpoints: &[BreakpointId]) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        hit_breakpoints.iter().any(|id| inner.by_id.contains_key(id))
    }

    #[must_use]
    pub fn contains(&self, breakpoint_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .contains_key(breakpoint_id)
    }

    /// Logpoints requested at `line` of `script_id`, oldest first.
    #[must_use]
    pub fn find_at(&self, script_id: &str, line: u32) -> Vec<Logpoint> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_line
            .get(&(script_id.to_string(), line))
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry without touching the debuggee, which drops its
    /// breakpoints on disconnect anyway.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.by_id.clear();
        inner.by_line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logspy_core::testing::{Call, FakeDebuggee};

    #[tokio::test]
    async fn test_add_then_remove_round_trip() {
        let (debuggee, _events) = FakeDebuggee::new();
        let table = LogpointTable::new();

        let lp = table.add(&*debuggee, Location::line("42", 7)).await.unwrap();
        assert_eq!(lp.breakpoint_id, "b1");
        assert_eq!(lp.actual_location, Location::line("42", 7).with_column(0));
        assert!(table.contains("b1"));

        table.remove(&*debuggee, "b1").await.unwrap();
        assert!(!table.contains("b1"));
        assert!(table.is_empty());
        assert!(table.find_at("42", 7).is_empty());

        assert_eq!(
            debuggee.calls(),
            vec![
                Call::SetBreakpoint(Location::line("42", 7)),
                Call::RemoveBreakpoint("b1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_add_is_not_idempotent() {
        let (debuggee, _events) = FakeDebuggee::new();
        let table = LogpointTable::new();

        let first = table.add(&*debuggee, Location::line("42", 7)).await.unwrap();
        let second = table.add(&*debuggee, Location::line("42", 7)).await.unwrap();

        assert_ne!(first.breakpoint_id, second.breakpoint_id);
        assert_eq!(table.len(), 2);
        assert_eq!(table.find_at("42", 7), vec![first, second]);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let (debuggee, _events) = FakeDebuggee::new();
        let table = LogpointTable::new();

        let err = table.remove(&*debuggee, "nope").await.unwrap_err();
        assert!(matches!(err, SessionError::LogpointNotFound(id) if id == "nope"));
        assert!(debuggee.calls().is_empty());
    }

    #[tokio::test]
    async fn test_hit_classification() {
        let (debuggee, _events) = FakeDebuggee::new();
        let table = LogpointTable::new();
        let b1 = table.add(&*debuggee, Location::line("42", 7)).await.unwrap().breakpoint_id;
        let b2 = "b2-foreign".to_string();

        assert!(table.is_hit(&[b1.clone()]));
        assert!(!table.is_hit(&[b2.clone()]));
        assert!(table.is_hit(&[b1, b2]));
        assert!(!table.is_hit(&[]));
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let (debuggee, _events) = FakeDebuggee::new();
        let table = LogpointTable::new();
        table.add(&*debuggee, Location::line("1", 1)).await.unwrap();
        table.clear();

        assert!(table.is_empty());
        assert!(table.find_at("1", 1).is_empty());
    }
}
