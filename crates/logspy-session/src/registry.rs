//! Script registry.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use logspy_core::{Script, ScriptId};

#[derive(Default)]
struct Inner {
    /// Parse order.
    scripts: Vec<Script>,
    index: HashMap<ScriptId, usize>,
}

/// Append-only record of every script the debuggee announced.
///
/// No eviction: the registry lives exactly as long as its session.
#[derive(Default)]
pub struct ScriptRegistry {
    inner: RwLock<Inner>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed script. A re-announced id replaces the previous entry in place.
    pub fn record(&self, script: Script) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&pos) = inner.index.get(&script.script_id) {
            inner.scripts[pos] = script;
        } else {
            let pos = inner.scripts.len();
            inner.index.insert(script.script_id.clone(), pos);
            inner.scripts.push(script);
        }
    }

    /// Look up a script by id.
    #[must_use]
    pub fn lookup(&self, script_id: &str) -> Option<Script> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.index.get(script_id).map(|&pos| inner.scripts[pos].clone())
    }

    /// Whether the script has been announced.
    #[must_use]
    pub fn contains(&self, script_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .contains_key(script_id)
    }

    /// Point-in-time copy of every script, in parse order.
    #[must_use]
    pub fn all(&self) -> Vec<Script> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .scripts
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .scripts
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_keeps_parse_order() {
        let registry = ScriptRegistry::new();
        registry.record(Script::new("9", "file:///b.js"));
        registry.record(Script::new("3", "file:///a.js"));
        registry.record(Script::new("12", ""));

        let ids: Vec<_> = registry.all().into_iter().map(|s| s.script_id).collect();
        assert_eq!(ids, vec!["9", "3", "12"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_lookup() {
        let registry = ScriptRegistry::new();
        assert!(registry.is_empty());
        registry.record(Script::new("42", "file:///srv/app.js"));

        assert_eq!(registry.lookup("42").unwrap().url, "file:///srv/app.js");
        assert!(registry.lookup("43").is_none());
        assert!(registry.contains("42"));
    }

    #[test]
    fn test_reannounced_script_replaced_in_place() {
        let registry = ScriptRegistry::new();
        registry.record(Script::new("1", "file:///old.js"));
        registry.record(Script::new("2", "file:///other.js"));
        registry.record(Script::new("1", "file:///new.js"));

        let all = registry.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].url, "file:///new.js");
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let registry = ScriptRegistry::new();
        registry.record(Script::new("1", "file:///a.js"));
        let before = registry.all();
        registry.record(Script::new("2", "file:///b.js"));

        assert_eq!(before.len(), 1);
        assert_eq!(registry.all().len(), 2);
    }
}
