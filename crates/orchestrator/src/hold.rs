use std::sync::Arc;

use llmgate_budget::BudgetController;
use llmgate_core::ResolvedCall;
use tracing::warn;

/// Guards a strict-mode `precheck_hold` written by `BudgetController::check`.
/// If the call path returns without calling `settle()` — a panic, an early
/// `?`, a cancelled future — `Drop` spawns a cleanup task that writes a
/// `cancel` event, so a leaked hold never poisons the daily-spend aggregate.
/// Grounded in the teacher's `LeaseGuard` over ledger leases.
pub struct HoldGuard {
    trace_id: uuid::Uuid,
    resolved: ResolvedCall,
    budget: Arc<BudgetController>,
    settled: bool,
}

impl HoldGuard {
    pub fn new(trace_id: uuid::Uuid, resolved: ResolvedCall, budget: Arc<BudgetController>) -> Self {
        Self { trace_id, resolved, budget, settled: false }
    }

    /// Marks the hold as settled; the call path has already written its own
    /// terminal `commit`/`cancel` event.
    pub fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let trace_id = self.trace_id;
        let provider = self.resolved.spec.provider.clone();
        let model_id = self.resolved.spec.model_id.clone();
        let budget = Arc::clone(&self.budget);
        warn!(trace_id = %trace_id, "hold leaked, releasing via HoldGuard");
        tokio::spawn(async move {
            let _ = budget.cancel(trace_id, &provider, &model_id, "hold leaked").await;
        });
    }
}
