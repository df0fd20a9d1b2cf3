//! In-process counters for degraded replies and provider failovers.
//!
//! Exposed as a JSON snapshot on `GET /health`; no metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use cq_llm::{ErrorClass, FailoverEvent, FailoverObserver, LogFailoverObserver};
use serde::Serialize;

use crate::error::DispatchError;

#[derive(Debug)]
pub struct Telemetry {
    started_at: DateTime<Utc>,
    messages: AtomicU64,
    postbacks: AtomicU64,
    keyword_routed: AtomicU64,
    nlu_requests: AtomicU64,
    throttled: AtomicU64,
    llm_throttled: AtomicU64,
    nlu_transient: AtomicU64,
    nlu_permanent: AtomicU64,
    nlu_canceled: AtomicU64,
    missing_parameter: AtomicU64,
    unknown_intent: AtomicU64,
    contract_violations: AtomicU64,
    malformed_postbacks: AtomicU64,
    failovers: AtomicU64,
    handler_panics: AtomicU64,
    timeouts: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub started_at: DateTime<Utc>,
    pub messages: u64,
    pub postbacks: u64,
    pub keyword_routed: u64,
    pub nlu_requests: u64,
    pub throttled: u64,
    pub llm_throttled: u64,
    pub nlu_transient: u64,
    pub nlu_permanent: u64,
    pub nlu_canceled: u64,
    pub missing_parameter: u64,
    pub unknown_intent: u64,
    pub contract_violations: u64,
    pub malformed_postbacks: u64,
    pub failovers: u64,
    pub handler_panics: u64,
    pub timeouts: u64,
    pub send_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            messages: AtomicU64::new(0),
            postbacks: AtomicU64::new(0),
            keyword_routed: AtomicU64::new(0),
            nlu_requests: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            llm_throttled: AtomicU64::new(0),
            nlu_transient: AtomicU64::new(0),
            nlu_permanent: AtomicU64::new(0),
            nlu_canceled: AtomicU64::new(0),
            missing_parameter: AtomicU64::new(0),
            unknown_intent: AtomicU64::new(0),
            contract_violations: AtomicU64::new(0),
            malformed_postbacks: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    pub fn message(&self) {
        bump(&self.messages);
    }

    pub fn postback(&self) {
        bump(&self.postbacks);
    }

    pub fn keyword_routed(&self) {
        bump(&self.keyword_routed);
    }

    pub fn nlu_request(&self) {
        bump(&self.nlu_requests);
    }

    pub fn throttled(&self) {
        bump(&self.throttled);
    }

    pub fn llm_throttled(&self) {
        bump(&self.llm_throttled);
    }

    pub fn nlu_failure(&self, class: ErrorClass) {
        match class {
            ErrorClass::Transient => bump(&self.nlu_transient),
            ErrorClass::Permanent => bump(&self.nlu_permanent),
            ErrorClass::Canceled => bump(&self.nlu_canceled),
        }
    }

    pub fn dispatch_error(&self, err: &DispatchError) {
        match err {
            DispatchError::MissingParameter { .. } => bump(&self.missing_parameter),
            DispatchError::UnknownIntent { .. } => bump(&self.unknown_intent),
        }
    }

    pub fn contract_violation(&self) {
        bump(&self.contract_violations);
    }

    pub fn malformed_postback(&self) {
        bump(&self.malformed_postbacks);
    }

    pub fn handler_panic(&self) {
        bump(&self.handler_panics);
    }

    pub fn timeout(&self) {
        bump(&self.timeouts);
    }

    pub fn send_failure(&self) {
        bump(&self.send_failures);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            started_at: self.started_at,
            messages: read(&self.messages),
            postbacks: read(&self.postbacks),
            keyword_routed: read(&self.keyword_routed),
            nlu_requests: read(&self.nlu_requests),
            throttled: read(&self.throttled),
            llm_throttled: read(&self.llm_throttled),
            nlu_transient: read(&self.nlu_transient),
            nlu_permanent: read(&self.nlu_permanent),
            nlu_canceled: read(&self.nlu_canceled),
            missing_parameter: read(&self.missing_parameter),
            unknown_intent: read(&self.unknown_intent),
            contract_violations: read(&self.contract_violations),
            malformed_postbacks: read(&self.malformed_postbacks),
            failovers: read(&self.failovers),
            handler_panics: read(&self.handler_panics),
            timeouts: read(&self.timeouts),
            send_failures: read(&self.send_failures),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverObserver for Telemetry {
    fn on_failover(&self, event: &FailoverEvent) {
        bump(&self.failovers);
        LogFailoverObserver.on_failover(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_llm::OperationKind;

    #[test]
    fn counters_start_at_zero() {
        let snap = Telemetry::new().snapshot();
        assert_eq!(snap.throttled, 0);
        assert_eq!(snap.failovers, 0);
    }

    #[test]
    fn nlu_failures_are_labelled_by_class() {
        let t = Telemetry::new();
        t.nlu_failure(ErrorClass::Transient);
        t.nlu_failure(ErrorClass::Permanent);
        t.nlu_failure(ErrorClass::Permanent);
        let snap = t.snapshot();
        assert_eq!(snap.nlu_transient, 1);
        assert_eq!(snap.nlu_permanent, 2);
        assert_eq!(snap.nlu_canceled, 0);
    }

    #[test]
    fn failover_observer_counts() {
        let t = Telemetry::new();
        t.on_failover(&FailoverEvent {
            from: "gemini".into(),
            to: "groq".into(),
            operation: OperationKind::Intent,
            class: ErrorClass::Transient,
            status: Some(429),
        });
        assert_eq!(t.snapshot().failovers, 1);
    }

    #[test]
    fn dispatch_errors_split_by_kind() {
        let t = Telemetry::new();
        t.dispatch_error(&DispatchError::missing("course", "search", "keyword"));
        t.dispatch_error(&DispatchError::unknown("id", "teleport"));
        t.dispatch_error(&DispatchError::unknown("usage", "reset"));
        let snap = t.snapshot();
        assert_eq!(snap.missing_parameter, 1);
        assert_eq!(snap.unknown_intent, 2);
    }
}
