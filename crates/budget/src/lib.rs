//! Admits or rejects a pending call based on the day-scoped spend aggregate
//! the Ledger maintains (§4.4).

pub mod error;

use std::sync::Mutex;

use llmgate_core::ledger::{EventStatus, LedgerEventType};
use llmgate_core::TokenUsage;
use llmgate_ledger::Ledger;
use rust_decimal::Decimal;

pub use error::{BudgetError, BudgetWarning, Result};

/// Outcome of a budget check (§4.4: `Allow | Reject(QuotaExceeded) | Warn`).
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Allow,
    Warn(BudgetWarning),
}

pub struct BudgetController {
    ledger: Ledger,
    daily_limit_usd: Decimal,
    warn_ratio: f64,
    /// Strict mode: record a durable `precheck_hold` (`sync=true`) before
    /// admitting; best-effort: no hold, race possible under concurrency.
    strict: bool,
    warned_midnight: Mutex<Option<f64>>,
    /// Serializes `check`'s read-spend/decide/write-hold sequence so two
    /// concurrent calls can't both read the same `spend_today` snapshot and
    /// both admit (§8 scenario 5: "exactly one call proceeds").
    admission_lock: tokio::sync::Mutex<()>,
}

impl BudgetController {
    pub fn new(ledger: Ledger, daily_limit_usd: Decimal, warn_ratio: f64, strict: bool) -> Self {
        Self {
            ledger,
            daily_limit_usd,
            warn_ratio,
            strict,
            warned_midnight: Mutex::new(None),
            admission_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Checks whether `estimated_cost_usd` can be admitted. In strict mode,
    /// on `Allow` a `precheck_hold` has already been durably written for
    /// `trace_id`; the caller must later `commit` or `cancel` it.
    pub async fn check(
        &self,
        trace_id: uuid::Uuid,
        provider: &str,
        model: &str,
        estimated_cost_usd: Decimal,
    ) -> Result<CheckOutcome> {
        let _admission = self.admission_lock.lock().await;
        let spend = self.ledger.spend_today()?;
        let spent = spend.total();
        let projected = spent + estimated_cost_usd;

        if projected > self.daily_limit_usd {
            return Err(BudgetError::QuotaExceeded {
                spent_usd: spent,
                estimate_usd: estimated_cost_usd,
                limit_usd: self.daily_limit_usd,
            });
        }

        let ratio = if self.daily_limit_usd.is_zero() {
            1.0
        } else {
            (projected / self.daily_limit_usd).to_string().parse::<f64>().unwrap_or(1.0)
        };

        let mut warning = None;
        if ratio >= self.warn_ratio && self.fire_warning_once_today() {
            tracing::warn!(provider, model, ratio, "daily spend approaching limit");
            warning = Some(BudgetWarning {
                spent_usd: spent,
                estimate_usd: estimated_cost_usd,
                limit_usd: self.daily_limit_usd,
                ratio,
            });
        }

        if self.strict {
            let mut hold = llmgate_ledger::new_event(trace_id, LedgerEventType::PrecheckHold, provider, model);
            hold.cost_est_usd = Some(estimated_cost_usd);
            self.ledger.append(hold, true).await?;
        }

        Ok(match warning {
            Some(w) => CheckOutcome::Warn(w),
            None => CheckOutcome::Allow,
        })
    }

    /// Writes the terminal `commit` event, superseding any `precheck_hold`
    /// for aggregation purposes.
    pub async fn commit(
        &self,
        trace_id: uuid::Uuid,
        provider: &str,
        model: &str,
        actual_cost_usd: Decimal,
        usage: TokenUsage,
    ) -> Result<()> {
        let mut event = llmgate_ledger::new_event(trace_id, LedgerEventType::Commit, provider, model);
        event.cost_actual_usd = Some(actual_cost_usd);
        event.usage = usage;
        self.ledger.append(event, self.strict).await?;
        Ok(())
    }

    /// Writes the terminal event for a call the caller abandoned mid-stream
    /// (§8 scenario 6): unlike `cancel`, this is a `commit` carrying whatever
    /// partial usage/cost accrued before abandonment, with `status =
    /// cancelled`, so the daily-spend aggregate still reflects the partial
    /// spend instead of dropping it the way an outright `cancel` would.
    pub async fn commit_cancelled(
        &self,
        trace_id: uuid::Uuid,
        provider: &str,
        model: &str,
        partial_cost_usd: Decimal,
        usage: TokenUsage,
    ) -> Result<()> {
        let mut event = llmgate_ledger::new_event(trace_id, LedgerEventType::Commit, provider, model);
        event.status = EventStatus::Cancelled;
        event.cost_actual_usd = Some(partial_cost_usd);
        event.usage = usage;
        self.ledger.append(event, self.strict).await?;
        Ok(())
    }

    /// Writes the terminal event for a call that gave up after retries or an
    /// unrecoverable adapter error (§4.8 step 9, §8 scenario 4): a `commit`
    /// with `status = error` carrying the failing error kind and message in
    /// `metadata`. Unlike `cancel`, this still supersedes any outstanding
    /// `precheck_hold` the same way a normal commit does, so a failed call
    /// doesn't leave a phantom hold inflating `spend_today`.
    pub async fn commit_failed(
        &self,
        trace_id: uuid::Uuid,
        provider: &str,
        model: &str,
        error_kind: &str,
        message: &str,
    ) -> Result<()> {
        let mut event = llmgate_ledger::new_event(trace_id, LedgerEventType::Commit, provider, model);
        event.status = EventStatus::Error;
        event.metadata = serde_json::json!({ "error_kind": error_kind, "message": message });
        self.ledger.append(event, self.strict).await?;
        Ok(())
    }

    /// Writes a `cancel` event; aggregation drops any outstanding hold.
    pub async fn cancel(&self, trace_id: uuid::Uuid, provider: &str, model: &str, reason: &str) -> Result<()> {
        let mut event = llmgate_ledger::new_event(trace_id, LedgerEventType::Cancel, provider, model);
        event.status = EventStatus::Cancelled;
        event.metadata = serde_json::json!({ "reason": reason });
        self.ledger.append(event, self.strict).await?;
        Ok(())
    }

    fn fire_warning_once_today(&self) -> bool {
        let midnight = llmgate_core::local_midnight_unix(chrono::Utc::now());
        let mut guard = self.warned_midnight.lock().unwrap();
        if *guard == Some(midnight) {
            return false;
        }
        *guard = Some(midnight);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn controller(limit: Decimal, strict: bool) -> (BudgetController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("l.db")).await.unwrap();
        (BudgetController::new(ledger, limit, 0.8, strict), dir)
    }

    #[tokio::test]
    async fn allows_when_under_limit() {
        let (ctrl, _dir) = controller(dec!(5.00), false).await;
        let outcome = ctrl
            .check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.05))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Allow));
    }

    #[tokio::test]
    async fn rejects_when_projection_exceeds_limit() {
        let (ctrl, _dir) = controller(dec!(1.00), false).await;
        ctrl.commit(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.99), TokenUsage::default())
            .await
            .unwrap();

        let err = ctrl.check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.05)).await.unwrap_err();
        assert!(matches!(err, BudgetError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn zero_limit_rejects_every_call() {
        let (ctrl, _dir) = controller(dec!(0.00), false).await;
        let err = ctrl.check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.00000001)).await.unwrap_err();
        assert!(matches!(err, BudgetError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn strict_mode_writes_durable_hold_before_admitting() {
        let (ctrl, _dir) = controller(dec!(1.00), true).await;
        let trace_id = uuid::Uuid::new_v4();
        ctrl.check(trace_id, "acme", "m1", dec!(0.60)).await.unwrap();

        // second concurrent call now sees the hold and is rejected
        let err = ctrl.check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.60)).await.unwrap_err();
        assert!(matches!(err, BudgetError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn concurrent_strict_checks_admit_exactly_one() {
        let (ctrl, _dir) = controller(dec!(1.00), true).await;
        let ctrl = std::sync::Arc::new(ctrl);

        let a = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.60)).await })
        };
        let b = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.check(uuid::Uuid::new_v4(), "acme", "m1", dec!(0.60)).await })
        };
        let (ra, rb) = tokio::join!(a, b);
        let results = [ra.unwrap(), rb.unwrap()];
        let admitted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(admitted, 1, "only one of two concurrent 0.60 holds fits under a 1.00 limit");
    }

    #[tokio::test]
    async fn commit_failed_writes_error_status_and_supersedes_hold() {
        let (ctrl, _dir) = controller(dec!(1.00), true).await;
        let trace_id = uuid::Uuid::new_v4();
        ctrl.check(trace_id, "acme", "m1", dec!(0.60)).await.unwrap();
        ctrl.commit_failed(trace_id, "acme", "m1", "fatal", "adapter exploded").await.unwrap();

        let spend = ctrl.ledger.spend_today().unwrap();
        assert_eq!(spend.total(), dec!(0.0), "a failed call must not leave a phantom hold");
    }
}
