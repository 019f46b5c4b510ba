//! Pause handling.
//!
//! Every pause notification ends with exactly one resume call, issued after
//! every other debuggee call the pause triggered. While the debuggee is
//! halted the whole monitored process is stalled, so nothing here may return
//! without resuming it, whatever happened while inspecting the pause.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use logspy_core::{CallFrame, Debuggee, LogpointHit, PausedEvent};

use crate::{
    session::{DebugSession, SessionError},
    snapshot::Snapshotter,
};

/// Whether the debuggee is currently halted in the pause handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Idle,
    Paused,
}

/// What a pause turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum PauseOutcome {
    /// One of our logpoints fired; the hit was emitted.
    Hit(LogpointHit),
    /// A breakpoint or exception this session does not own.
    Foreign,
    /// No breakpoint and no exception.
    Unexpected,
    /// Inspecting the pause failed.
    Failed(String),
}

fn function_name(frame: &CallFrame) -> &str {
    if frame.function_name.is_empty() {
        "<anonymous>"
    } else {
        &frame.function_name
    }
}

impl<D> DebugSession<D>
where
    D: Debuggee + ?Sized,
{
    /// Handle a pause notification and resume the debuggee.
    pub async fn handle_paused(&self, event: PausedEvent) -> PauseOutcome {
        self.set_pause_state(PauseState::Paused);

        let inspected = AssertUnwindSafe(self.inspect_pause(&event))
            .catch_unwind()
            .await;

        if let Err(e) = self.debuggee().resume().await {
            tracing::error!(error = %e, "failed to resume debuggee");
        }
        self.set_pause_state(PauseState::Idle);

        match inspected {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error handling pause");
                PauseOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!("pause handler panicked");
                PauseOutcome::Failed("pause handler panicked".to_string())
            }
        }
    }

    async fn inspect_pause(&self, event: &PausedEvent) -> Result<PauseOutcome, SessionError> {
        let top = event
            .call_frames
            .first()
            .ok_or(SessionError::EmptyCallStack)?;
        let script = self
            .scripts()
            .lookup(&top.location.script_id)
            .ok_or_else(|| SessionError::ScriptNotFound(top.location.script_id.clone()))?;

        tracing::debug!(
            function = function_name(top),
            file = %script.url,
            line = top.location.line_number,
            reason = %event.reason,
            hit_breakpoints = ?event.hit_breakpoints,
            "paused"
        );

        if event.hit_breakpoints.is_empty() {
            if event.is_exception() {
                return Ok(PauseOutcome::Foreign);
            }
            tracing::warn!(reason = %event.reason, "paused with no breakpoints hit");
            return Ok(PauseOutcome::Unexpected);
        }

        if !self.logpoints().is_hit(&event.hit_breakpoints) {
            tracing::debug!(hit_breakpoints = ?event.hit_breakpoints, "pause not caused by a logpoint");
            return Ok(PauseOutcome::Foreign);
        }

        let scope = top
            .scope_chain
            .first()
            .filter(|scope| scope.object.object_id.is_some())
            .ok_or(SessionError::MissingScope)?;

        let vars = Snapshotter::new(self.debuggee(), self.config().max_depth)
            .snapshot(&scope.object)
            .await;

        let hit = LogpointHit::now(event.hit_breakpoints.clone(), vars);
        if self.hits().emit(hit.clone()) == 0 {
            tracing::debug!(breakpoint_ids = ?hit.breakpoint_ids, "no listener, logpoint hit dropped");
        }
        Ok(PauseOutcome::Hit(hit))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::SessionConfig;
    use logspy_core::{
        DebuggeeEvent, Location, PropertyDescriptor, RemoteObject, Scope, Script, ValueKind,
        testing::{Call, FakeDebuggee},
    };
    use serde_json::json;

    async fn attached(max_depth: usize) -> (Arc<DebugSession<FakeDebuggee>>, Arc<FakeDebuggee>) {
        let (debuggee, events) = FakeDebuggee::new();
        let config = SessionConfig {
            max_depth,
            ..SessionConfig::default()
        };
        let session = DebugSession::new(Arc::clone(&debuggee), events, config);
        session.initialize().await.unwrap();
        session
            .handle_event(DebuggeeEvent::ScriptParsed(
                Script::new("42", "file:///srv/app.js").with_extents((0, 0), (20, 0)),
            ))
            .await;
        (session, debuggee)
    }

    fn paused_at(line: u32, hit: &[&str], scope_object: Option<&str>) -> PausedEvent {
        let scope_chain = scope_object
            .map(|id| Scope {
                kind: "local".to_string(),
                object: RemoteObject::object(id),
                name: None,
            })
            .into_iter()
            .collect();
        PausedEvent {
            call_frames: vec![CallFrame {
                call_frame_id: "cf-0".to_string(),
                function_name: "handler".to_string(),
                location: Location::line("42", line),
                scope_chain,
            }],
            reason: "other".to_string(),
            hit_breakpoints: hit.iter().map(ToString::to_string).collect(),
        }
    }

    /// Calls made after `mark`, asserting the last one is the only resume.
    fn assert_resumed_last(debuggee: &FakeDebuggee, mark: usize) -> Vec<Call> {
        let calls = debuggee.calls()[mark..].to_vec();
        assert_eq!(calls.last(), Some(&Call::Resume), "calls: {calls:?}");
        assert_eq!(calls.iter().filter(|c| **c == Call::Resume).count(), 1);
        calls
    }

    #[tokio::test]
    async fn test_hit_snapshots_then_resumes() {
        let (session, debuggee) = attached(2).await;
        session.add_logpoint("42", 7).await.unwrap();
        debuggee.set_object(
            "scope",
            vec![PropertyDescriptor::new("x", RemoteObject::primitive(ValueKind::Number, json!(1)))],
        );
        let mut hits = session.subscribe();

        let mark = debuggee.calls().len();
        let outcome = session.handle_paused(paused_at(7, &["b1"], Some("scope"))).await;

        let calls = assert_resumed_last(&debuggee, mark);
        assert_eq!(calls, vec![Call::GetProperties("scope".to_string()), Call::Resume]);

        let PauseOutcome::Hit(hit) = outcome else {
            panic!("expected a hit, got {outcome:?}");
        };
        assert_eq!(hit.vars, json!({"x": 1}));
        assert_eq!(hits.next_event().await, Some(hit));
        assert_eq!(*session.pause_state().borrow(), PauseState::Idle);
    }

    #[tokio::test]
    async fn test_foreign_breakpoint_resumes_without_snapshot() {
        let (session, debuggee) = attached(2).await;
        let mark = debuggee.calls().len();

        let outcome = session.handle_paused(paused_at(3, &["other"], Some("scope"))).await;

        assert_eq!(outcome, PauseOutcome::Foreign);
        assert_eq!(assert_resumed_last(&debuggee, mark), vec![Call::Resume]);
    }

    #[tokio::test]
    async fn test_unexpected_pause_still_resumes() {
        let (session, debuggee) = attached(2).await;
        let mark = debuggee.calls().len();

        let outcome = session.handle_paused(paused_at(3, &[], None)).await;

        assert_eq!(outcome, PauseOutcome::Unexpected);
        assert_resumed_last(&debuggee, mark);
    }

    #[tokio::test]
    async fn test_exception_pause_is_foreign() {
        let (session, debuggee) = attached(2).await;
        let mark = debuggee.calls().len();
        let mut event = paused_at(3, &[], None);
        event.reason = "exception".to_string();

        assert_eq!(session.handle_paused(event).await, PauseOutcome::Foreign);
        assert_resumed_last(&debuggee, mark);
    }

    #[tokio::test]
    async fn test_snapshot_failure_still_resumes() {
        let (session, debuggee) = attached(2).await;
        session.add_logpoint("42", 7).await.unwrap();
        debuggee.fail_properties("scope");
        let mark = debuggee.calls().len();

        let outcome = session.handle_paused(paused_at(7, &["b1"], Some("scope"))).await;

        let PauseOutcome::Hit(hit) = outcome else {
            panic!("expected a degraded hit, got {outcome:?}");
        };
        assert_eq!(hit.vars, json!("<unavailable>"));
        assert_resumed_last(&debuggee, mark);
    }

    #[tokio::test]
    async fn test_panic_while_inspecting_still_resumes() {
        let (session, debuggee) = attached(2).await;
        session.add_logpoint("42", 7).await.unwrap();
        debuggee.panic_on_properties("scope");
        let mut hits = session.subscribe();
        let mark = debuggee.calls().len();

        let outcome = session.handle_paused(paused_at(7, &["b1"], Some("scope"))).await;

        assert!(matches!(outcome, PauseOutcome::Failed(_)), "{outcome:?}");
        assert_eq!(
            assert_resumed_last(&debuggee, mark),
            vec![Call::GetProperties("scope".to_string()), Call::Resume]
        );
        assert_eq!(*session.pause_state().borrow(), PauseState::Idle);

        hits.close();
        assert_eq!(hits.next_event().await, None);
    }

    #[tokio::test]
    async fn test_unknown_script_fails_but_resumes() {
        let (session, debuggee) = attached(2).await;
        let mark = debuggee.calls().len();
        let mut event = paused_at(7, &["b1"], Some("scope"));
        event.call_frames[0].location.script_id = "999".to_string();

        let outcome = session.handle_paused(event).await;

        assert!(matches!(outcome, PauseOutcome::Failed(_)));
        assert_eq!(assert_resumed_last(&debuggee, mark), vec![Call::Resume]);
    }

    #[tokio::test]
    async fn test_empty_call_stack_fails_but_resumes() {
        let (session, debuggee) = attached(2).await;
        let mark = debuggee.calls().len();
        let event = PausedEvent {
            call_frames: vec![],
            reason: "other".to_string(),
            hit_breakpoints: vec!["b1".to_string()],
        };

        assert!(matches!(session.handle_paused(event).await, PauseOutcome::Failed(_)));
        assert_resumed_last(&debuggee, mark);
    }

    #[tokio::test]
    async fn test_hit_without_scope_fails_but_resumes() {
        let (session, debuggee) = attached(2).await;
        session.add_logpoint("42", 7).await.unwrap();
        let mark = debuggee.calls().len();

        let outcome = session.handle_paused(paused_at(7, &["b1"], None)).await;

        assert!(matches!(outcome, PauseOutcome::Failed(_)));
        assert_resumed_last(&debuggee, mark);
    }
}
