pub mod ledger;
pub mod result;
pub mod types;

pub use ledger::{DailySpend, EventStatus, LedgerEvent, LedgerEventType};
pub use result::{GatewayError, Result};
pub use types::{
    Capability, ContentPart, Endpoint, ErrorKind, FinishReason, GenConfig, GenerationResponse,
    Limits, ModelSpec, Pricing, ResolvedCall, RoutingPolicy, StreamEvent, Task, Timing,
    TokenUsage, TraceId, UnitType,
};

/// Unix timestamp in fractional seconds, for `LedgerEvent::timestamp`.
pub fn now_unix_fractional() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

/// Start (00:00:00) of the local-midnight window containing `now`, in unix seconds.
pub fn local_midnight_unix(now: chrono::DateTime<chrono::Utc>) -> f64 {
    let local = now.with_timezone(&chrono::Local);
    let midnight_naive = local.date_naive().and_hms_opt(0, 0, 0).expect("valid midnight");
    midnight_naive
        .and_local_timezone(chrono::Local)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc).timestamp() as f64)
        .unwrap_or_else(|| now.timestamp() as f64)
}
