//! Session-scoped, append-only log of everything a run did.
//!
//! The log is a pure observer: the runner and orchestrator write to it after
//! each decision and never read it back to decide anything. Writes never
//! fail from the caller's point of view; records that cannot be stored
//! (after `end_session`, or with an unserializable payload) are dropped and
//! counted instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ErrorRecord;

/// Stage label for run-level events that belong to no single stage.
pub const RUN_SCOPE: &str = "run";

/// Classification of a session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    SessionStarted,
    StateTransition,
    StageStarted,
    Generated,
    Validated,
    Patched,
    RegenerationRequested,
    TransientError,
    BudgetExhausted,
    RepairUnresolved,
    StageCompleted,
    TerminalCheck,
    Error,
    SessionEnded,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// 1-based position in the log.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub kind: SessionEventKind,
    pub payload: serde_json::Value,
}

/// Append-only record of one run's stage transitions, decisions, and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    session_id: String,
    run_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    passed: Option<bool>,
    events: Vec<SessionEvent>,
    errors: Vec<ErrorRecord>,
    dropped_events: u64,
}

impl SessionLog {
    /// Open a new session for `run_id`. The session id is available via
    /// [`SessionLog::session_id`].
    pub fn start_session(run_id: impl Into<String>) -> Self {
        let mut log = Self {
            session_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            passed: None,
            events: Vec::new(),
            errors: Vec::new(),
            dropped_events: 0,
        };
        let session_id = log.session_id.clone();
        log.record(
            RUN_SCOPE,
            SessionEventKind::SessionStarted,
            serde_json::json!({ "session_id": session_id }),
        );
        log
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Verdict passed to `end_session`, once ended.
    pub fn passed(&self) -> Option<bool> {
        self.passed
    }

    /// Append an event. Dropped (and counted) if the session has ended or the
    /// payload does not serialize.
    pub fn record<P: Serialize>(&mut self, stage: &str, kind: SessionEventKind, payload: P) {
        if self.is_ended() {
            self.drop_event(stage, kind, "session already ended");
            return;
        }
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                self.drop_event(stage, kind, &e.to_string());
                return;
            }
        };
        self.push_event(stage, kind, payload);
    }

    /// Append an error record and a matching `Error` event.
    pub fn record_error(&mut self, record: ErrorRecord) {
        if self.is_ended() {
            self.drop_event(&record.stage, SessionEventKind::Error, "session already ended");
            return;
        }
        let payload = serde_json::json!({
            "error_kind": record.error_kind,
            "message": record.message,
        });
        let stage = record.stage.clone();
        self.errors.push(record);
        self.push_event(&stage, SessionEventKind::Error, payload);
    }

    /// Close the session. Later writes, including a second `end_session`, are dropped.
    pub fn end_session(&mut self, passed: bool) {
        if self.is_ended() {
            self.drop_event(RUN_SCOPE, SessionEventKind::SessionEnded, "session already ended");
            return;
        }
        self.push_event(
            RUN_SCOPE,
            SessionEventKind::SessionEnded,
            serde_json::json!({ "passed": passed }),
        );
        self.passed = Some(passed);
        self.ended_at = Some(Utc::now());
    }

    pub fn get_errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn events_for_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a SessionEvent> + 'a {
        self.events.iter().filter(move |e| e.stage == stage)
    }

    pub fn events_of_kind(&self, kind: SessionEventKind) -> impl Iterator<Item = &SessionEvent> + '_ {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    /// Writes that were swallowed instead of recorded.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    fn push_event(&mut self, stage: &str, kind: SessionEventKind, payload: serde_json::Value) {
        let seq = self.events.len() as u64 + 1;
        debug!(run_id = %self.run_id, seq, stage = %stage, kind = ?kind, "session event");
        self.events.push(SessionEvent {
            seq,
            timestamp: Utc::now(),
            stage: stage.to_string(),
            kind,
            payload,
        });
    }

    fn drop_event(&mut self, stage: &str, kind: SessionEventKind, reason: &str) {
        self.dropped_events += 1;
        debug!(run_id = %self.run_id, stage = %stage, kind = ?kind, reason = %reason, "session event dropped");
    }
}
