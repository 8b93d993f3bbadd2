use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Timing, TokenUsage, TraceId};

/// Kind of lifecycle event recorded in the ledger (§3 `LedgerEvent.event_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    PrecheckHold,
    Commit,
    Cancel,
    Adjust,
    RetryAttempt,
}

/// Terminal or intermediate status attached to a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Error,
    Cancelled,
    RateLimited,
}

/// The persisted unit the Ledger appends (§3 `LedgerEvent`), immutable once written.
///
/// Invariants enforced by `llmgate-ledger`, not by this type: at most one
/// `precheck_hold` per `trace_id`; a terminal event (`commit`/`cancel`) follows
/// within `retry_budget_s + max_delay_s + tolerance`; a `commit` supersedes any
/// `precheck_hold` when computing daily-spend aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: uuid::Uuid,
    pub trace_id: TraceId,
    pub event_type: LedgerEventType,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_est_usd: Option<Decimal>,
    pub cost_actual_usd: Option<Decimal>,
    pub status: EventStatus,
    pub timing: Option<Timing>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Unix seconds, fractional.
    pub timestamp: f64,
}

impl LedgerEvent {
    pub fn new(
        trace_id: TraceId,
        event_type: LedgerEventType,
        provider: impl Into<String>,
        model: impl Into<String>,
        status: EventStatus,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            trace_id,
            event_type,
            provider: provider.into(),
            model: model.into(),
            usage: TokenUsage::default(),
            cost_est_usd: None,
            cost_actual_usd: None,
            status,
            timing: None,
            metadata: serde_json::Value::Null,
            timestamp: crate::now_unix_fractional(),
        }
    }
}

/// `sum(cost_actual_usd for commit|adjust) + sum(cost_est_usd for outstanding
/// precheck_holds)`, scoped to `[local-midnight, now)` (§3 daily-spend aggregate).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailySpend {
    pub committed_usd: Decimal,
    pub held_usd: Decimal,
}

impl DailySpend {
    pub fn total(&self) -> Decimal {
        self.committed_usd + self.held_usd
    }
}
