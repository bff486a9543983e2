//! Post-success usage accounting.
//!
//! Every allowed request bumps the DAILY and MONTHLY rows of its permission and
//! the per-model aggregates in the key-value store. The per-model keys are
//! date-bucketed and carry a 32-day TTL, as does the set of models used per
//! `(app, resource, date)`.

use chrono::{DateTime, Utc};

use gatehouse_core::period::{MONTHLY_COUNTER_TTL, PeriodType, period_key};
use gatehouse_store::models::{UsageDelta, UsageModel, UsagePeriod};
use gatehouse_store::{KvStore, RocksDb, StoreError};

/// Token counts from a completed response, normalized.
#[derive(Debug, Clone, Default)]
pub struct UsageNumbers {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model: Option<String>,
}

impl UsageNumbers {
    /// Fills a missing total from the parts.
    pub fn normalized(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.input_tokens + self.output_tokens;
        }
        self
    }
}

/// Records one allowed request: +1 on both period rows, +tokens on both, and
/// the per-model aggregates.
pub fn record_usage(
    db: &RocksDb,
    kv: &KvStore,
    app_id: &str,
    resource_id: &str,
    permission_id: &str,
    usage: &UsageNumbers,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let delta = UsageDelta {
        requests: 1,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    };

    let daily_key = period_key(PeriodType::Daily, now);
    let monthly_key = period_key(PeriodType::Monthly, now);
    UsageModel::add(db, permission_id, UsagePeriod::Daily, &daily_key, delta)?;
    UsageModel::add(db, permission_id, UsagePeriod::Monthly, &monthly_key, delta)?;

    if let Some(model) = &usage.model {
        let base = format!("usage:{app_id}/{resource_id}/{daily_key}/{model}");
        kv.incr(&format!("{base}/requests"), 1, MONTHLY_COUNTER_TTL)?;
        kv.incr(
            &format!("{base}/input_tokens"),
            usage.input_tokens,
            MONTHLY_COUNTER_TTL,
        )?;
        kv.incr(
            &format!("{base}/output_tokens"),
            usage.output_tokens,
            MONTHLY_COUNTER_TTL,
        )?;
        kv.incr(
            &format!("{base}/total_tokens"),
            usage.total_tokens,
            MONTHLY_COUNTER_TTL,
        )?;
        kv.add_to_set(
            &format!("usage:models:{app_id}/{resource_id}/{daily_key}"),
            model,
            MONTHLY_COUNTER_TTL,
        )?;
    }

    tracing::trace!(
        permission_id,
        tokens = usage.total_tokens,
        model = usage.model.as_deref().unwrap_or("-"),
        "usage recorded"
    );
    Ok(())
}
