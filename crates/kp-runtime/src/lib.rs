#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Fail closed: anything the kernel cannot do exactly is an error.
    #[default]
    Strict,
    /// Repair where a well-defined fallback exists and record the decision.
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Sorted uniques were requested for keys with no total order.
    UnsortableKeys,
    /// A scratch arena would exceed its byte budget.
    ArenaBudget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts_unix_ms: u64,
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub issue: CompatibilityIssue,
}

/// Append-only log of the policy decisions taken during one or more calls.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<DecisionRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that changed the outcome of an operation.
    pub fn repairs(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.records
            .iter()
            .filter(|record| record.action == DecisionAction::Repair)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimePolicy {
    pub mode: RuntimeMode,
}

impl RuntimePolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
        }
    }

    #[must_use]
    pub fn hardened() -> Self {
        Self {
            mode: RuntimeMode::Hardened,
        }
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.mode == RuntimeMode::Strict
    }

    /// Decide what to do when sorted output was requested for keys that
    /// cannot be ordered. Strict rejects; hardened keeps first-seen order.
    pub fn decide_unsortable_keys(
        &self,
        subject: impl Into<String>,
        detail: impl Into<String>,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        let action = match self.mode {
            RuntimeMode::Strict => DecisionAction::Reject,
            RuntimeMode::Hardened => DecisionAction::Repair,
        };
        let issue = CompatibilityIssue {
            kind: IssueKind::UnsortableKeys,
            subject: subject.into(),
            detail: detail.into(),
        };
        if action == DecisionAction::Repair {
            warn!(
                subject = %issue.subject,
                detail = %issue.detail,
                "unsortable keys; keeping first-seen order"
            );
        }
        ledger.push(record(self.mode, action, issue));
        action
    }

    /// Decide whether a scratch arena of `estimated_bytes` may be used.
    ///
    /// Over budget, both modes take the heap path; the decision is only
    /// recorded so callers can see that the fast path was skipped.
    pub fn decide_arena_admission(
        &self,
        estimated_bytes: usize,
        budget_bytes: usize,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        if estimated_bytes <= budget_bytes {
            return DecisionAction::Allow;
        }
        let issue = CompatibilityIssue {
            kind: IssueKind::ArenaBudget,
            subject: "groupby_arena".to_owned(),
            detail: format!("estimated_bytes={estimated_bytes} budget_bytes={budget_bytes}"),
        };
        ledger.push(record(self.mode, DecisionAction::Repair, issue));
        DecisionAction::Repair
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}

fn record(mode: RuntimeMode, action: DecisionAction, issue: CompatibilityIssue) -> DecisionRecord {
    DecisionRecord {
        ts_unix_ms: now_unix_ms().unwrap_or_default(),
        mode,
        action,
        issue,
    }
}
