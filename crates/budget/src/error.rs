use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("daily spend limit exceeded: spent {spent_usd} + estimate {estimate_usd} > limit {limit_usd}")]
    QuotaExceeded {
        spent_usd: Decimal,
        estimate_usd: Decimal,
        limit_usd: Decimal,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] llmgate_ledger::LedgerError),
}

pub type Result<T> = std::result::Result<T, BudgetError>;

/// Non-fatal outcome of `BudgetController::check` — admitted, but close to
/// the daily cap (§4.4).
#[derive(Debug, Clone)]
pub struct BudgetWarning {
    pub spent_usd: Decimal,
    pub estimate_usd: Decimal,
    pub limit_usd: Decimal,
    pub ratio: f64,
}
