use rusqlite::Row;
use rust_decimal::Decimal;

use llmgate_core::ledger::{EventStatus, LedgerEvent, LedgerEventType};
use llmgate_core::types::{Timing, TokenUsage};

/// Maps an `events` table row back into a `LedgerEvent` (read path, §4.3).
pub fn row_to_event(row: &Row<'_>) -> rusqlite::Result<LedgerEvent> {
    let event_id: String = row.get("event_id")?;
    let trace_id: String = row.get("trace_id")?;
    let event_type: String = row.get("event_type")?;
    let usage_json: String = row.get("usage_json")?;
    let cost_est: Option<f64> = row.get("cost_est_usd")?;
    let cost_actual: Option<f64> = row.get("cost_actual_usd")?;
    let status: String = row.get("status")?;
    let timing_json: Option<String> = row.get("timing_json")?;
    let metadata_json: Option<String> = row.get("metadata_json")?;

    Ok(LedgerEvent {
        event_id: uuid::Uuid::parse_str(&event_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        trace_id: uuid::Uuid::parse_str(&trace_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?,
        event_type: parse_event_type(&event_type),
        provider: row.get("provider")?,
        model: row.get("model")?,
        usage: serde_json::from_str::<TokenUsage>(&usage_json).unwrap_or_default(),
        cost_est_usd: cost_est.and_then(|f| Decimal::try_from(f).ok()),
        cost_actual_usd: cost_actual.and_then(|f| Decimal::try_from(f).ok()),
        status: parse_status(&status),
        timing: timing_json.and_then(|s| serde_json::from_str::<Timing>(&s).ok()),
        metadata: metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        timestamp: row.get("timestamp")?,
    })
}

pub fn event_type_str(t: LedgerEventType) -> &'static str {
    match t {
        LedgerEventType::PrecheckHold => "precheck_hold",
        LedgerEventType::Commit => "commit",
        LedgerEventType::Cancel => "cancel",
        LedgerEventType::Adjust => "adjust",
        LedgerEventType::RetryAttempt => "retry_attempt",
    }
}

fn parse_event_type(s: &str) -> LedgerEventType {
    match s {
        "precheck_hold" => LedgerEventType::PrecheckHold,
        "commit" => LedgerEventType::Commit,
        "cancel" => LedgerEventType::Cancel,
        "adjust" => LedgerEventType::Adjust,
        _ => LedgerEventType::RetryAttempt,
    }
}

pub fn status_str(s: EventStatus) -> &'static str {
    match s {
        EventStatus::Ok => "ok",
        EventStatus::Error => "error",
        EventStatus::Cancelled => "cancelled",
        EventStatus::RateLimited => "rate_limited",
    }
}

fn parse_status(s: &str) -> EventStatus {
    match s {
        "ok" => EventStatus::Ok,
        "cancelled" => EventStatus::Cancelled,
        "rate_limited" => EventStatus::RateLimited,
        _ => EventStatus::Error,
    }
}
