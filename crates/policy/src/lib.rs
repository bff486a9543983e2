//! Access policy evaluation and usage accounting.
//!
//! After authentication resolves an `(app, resource, action)`, the engine loads
//! the matching permission and walks its checks in a fixed order, returning on
//! the first failure: validity window, expiry, local time window, rate limit,
//! quotas, token budgets. Plugin-specific constraints (model allow-lists and the
//! like) are enforced while the plugin shapes the request, before the engine
//! runs.

/// The ordered checks.
pub mod engine;
/// Post-success accounting.
pub mod usage;

pub use engine::{PolicyEngine, RequestFacts};
pub use usage::{UsageNumbers, record_usage};

use gatehouse_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("no active permission for this resource and action")]
    PermissionNotFound,

    #[error("permission is not yet valid")]
    NotYetValid,

    #[error("permission has expired")]
    Expired,

    #[error("outside the permitted time window")]
    OutsideTimeWindow,

    #[error("not permitted on this day")]
    DayNotAllowed,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("daily request quota exhausted")]
    DailyQuotaExceeded,

    #[error("monthly request quota exhausted")]
    MonthlyQuotaExceeded,

    #[error("daily token budget exhausted")]
    DailyTokenBudgetExceeded,

    #[error("monthly token budget exhausted")]
    MonthlyTokenBudgetExceeded,

    #[error(transparent)]
    Store(#[from] StoreError),
}
