use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

use gatehouse_core::ResourceId;
use gatehouse_core::period::{PeriodType, period_key};
use gatehouse_store::models::{PermissionModel, PermissionStatus, UsageModel, UsagePeriod};
use gatehouse_store::{KvStore, RocksDb};

use crate::PolicyError;

/// Facts about the current request that policy checks consume.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub now: DateTime<Utc>,
    /// Pre-flight input token estimate from the plugin's shaping pass.
    pub input_tokens: u64,
}

/// Evaluates permissions against the durable usage rows and the volatile
/// counters.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    db: RocksDb,
    kv: KvStore,
}

impl PolicyEngine {
    pub fn new(db: RocksDb, kv: KvStore) -> Self {
        PolicyEngine { db, kv }
    }

    /// Loads the ACTIVE permission for the triple, or fails closed.
    pub fn load_permission(
        &self,
        app_id: &str,
        resource_id: &ResourceId,
        action: &str,
    ) -> Result<PermissionModel, PolicyError> {
        let permission = PermissionModel::find(&self.db, app_id, resource_id, action)?
            .ok_or(PolicyError::PermissionNotFound)?;
        if permission.status() != PermissionStatus::Active {
            return Err(PolicyError::PermissionNotFound);
        }
        Ok(permission)
    }

    /// Runs the ordered checks. The rate counter increments even on rejection,
    /// so a burst saturates the window instead of probing it.
    pub fn evaluate(
        &self,
        permission: &PermissionModel,
        facts: &RequestFacts,
    ) -> Result<(), PolicyError> {
        let now = facts.now.timestamp().max(0) as u64;

        if permission.valid_from != 0 && now < permission.valid_from {
            return Err(PolicyError::NotYetValid);
        }

        if permission.expires_at != 0 && now > permission.expires_at {
            self.self_heal_expired(permission);
            return Err(PolicyError::Expired);
        }

        if let Some(window) = &permission.time_window {
            check_time_window(window, facts.now)?;
        }

        if let Some(rate) = &permission.rate_limit {
            if rate.max_requests > 0 && rate.window_seconds > 0 {
                let window_start = now / rate.window_seconds * rate.window_seconds;
                let key = format!("rate:{}:{window_start}", permission.id);
                let count = self.kv.incr(
                    &key,
                    1,
                    std::time::Duration::from_secs(rate.window_seconds),
                )?;
                if count > rate.max_requests {
                    tracing::debug!(permission_id = %permission.id, count, "rate window saturated");
                    return Err(PolicyError::RateLimited);
                }
            }
        }

        let daily = self.usage_row(permission, UsagePeriod::Daily, facts.now)?;
        let monthly = self.usage_row(permission, UsagePeriod::Monthly, facts.now)?;

        if permission.daily_quota > 0 && daily.request_count >= permission.daily_quota {
            return Err(PolicyError::DailyQuotaExceeded);
        }
        if permission.monthly_quota > 0 && monthly.request_count >= permission.monthly_quota {
            return Err(PolicyError::MonthlyQuotaExceeded);
        }

        if permission.daily_token_budget > 0
            && daily.total_tokens.saturating_add(facts.input_tokens) > permission.daily_token_budget
        {
            return Err(PolicyError::DailyTokenBudgetExceeded);
        }
        if permission.monthly_token_budget > 0
            && monthly.total_tokens.saturating_add(facts.input_tokens)
                > permission.monthly_token_budget
        {
            return Err(PolicyError::MonthlyTokenBudgetExceeded);
        }

        Ok(())
    }

    fn usage_row(
        &self,
        permission: &PermissionModel,
        period: UsagePeriod,
        now: DateTime<Utc>,
    ) -> Result<UsageModel, PolicyError> {
        let period_type = match period {
            UsagePeriod::Daily => PeriodType::Daily,
            UsagePeriod::Monthly => PeriodType::Monthly,
        };
        let key = period_key(period_type, now);
        Ok(
            UsageModel::load(&self.db, &permission.id, period, &key)?.unwrap_or(UsageModel {
                permission_id: permission.id.clone(),
                period_type: period as i32,
                period_start: key,
                request_count: 0,
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                updated_at: 0,
            }),
        )
    }

    /// Flips an overdue row to EXPIRED off the request path. The request that
    /// noticed it already failed closed.
    fn self_heal_expired(&self, permission: &PermissionModel) {
        let db = self.db.clone();
        let row = permission.clone();
        let persist = move || {
            let mut row = row;
            row.set_status(PermissionStatus::Expired);
            if let Err(error) = row.save(&db) {
                tracing::warn!(%error, "failed to mark permission expired");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(persist);
            }
            Err(_) => persist(),
        }
    }

    /// The TTL'd counters the engine shares with usage accounting.
    pub fn kv(&self) -> &KvStore {
        &self.kv
    }
}

fn check_time_window(
    window: &gatehouse_store::models::TimeWindowModel,
    now: DateTime<Utc>,
) -> Result<(), PolicyError> {
    // An admin-written zone name that fails to parse falls back to UTC; the
    // window still applies rather than taking the permission down.
    let tz: Tz = window.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);

    if !window.allowed_days.is_empty() {
        let day = local.weekday().num_days_from_sunday();
        if !window.allowed_days.contains(&day) {
            return Err(PolicyError::DayNotAllowed);
        }
    }

    let hour = local.hour();
    let inside = if window.start_hour <= window.end_hour {
        hour >= window.start_hour && hour < window.end_hour
    } else {
        hour >= window.start_hour || hour < window.end_hour
    };
    if inside {
        Ok(())
    } else {
        Err(PolicyError::OutsideTimeWindow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatehouse_core::unix_now;
    use gatehouse_store::RocksDbConfig;
    use gatehouse_store::models::{RateLimitModel, TimeWindowModel, UsageDelta};

    fn engine() -> (tempfile::TempDir, PolicyEngine, RocksDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = RocksDb::open(tmp.path(), &RocksDbConfig::default()).unwrap();
        let kv = KvStore::new(db.clone());
        (tmp, PolicyEngine::new(db.clone(), kv), db)
    }

    fn resource() -> ResourceId {
        "llm:groq".parse().unwrap()
    }

    fn permission(db: &RocksDb) -> PermissionModel {
        let mut p = PermissionModel::new("app-1", &resource(), "chat.completions");
        p.save(db).unwrap();
        p
    }

    fn facts() -> RequestFacts {
        RequestFacts {
            now: Utc::now(),
            input_tokens: 0,
        }
    }

    #[test]
    fn missing_permission_fails_closed() {
        let (_tmp, engine, _db) = engine();
        let err = engine
            .load_permission("app-1", &resource(), "chat.completions")
            .unwrap_err();
        assert!(matches!(err, PolicyError::PermissionNotFound));
    }

    #[test]
    fn non_active_permission_fails_closed() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.set_status(PermissionStatus::Revoked);
        p.save(&db).unwrap();
        let err = engine
            .load_permission("app-1", &resource(), "chat.completions")
            .unwrap_err();
        assert!(matches!(err, PolicyError::PermissionNotFound));
    }

    #[test]
    fn not_yet_valid() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.valid_from = unix_now() + 3600;
        assert!(matches!(
            engine.evaluate(&p, &facts()),
            Err(PolicyError::NotYetValid)
        ));
    }

    #[test]
    fn expired_permission_self_heals() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.expires_at = unix_now() - 1;
        p.save(&db).unwrap();

        assert!(matches!(
            engine.evaluate(&p, &facts()),
            Err(PolicyError::Expired)
        ));

        // Without an async runtime the row flips synchronously.
        let row = PermissionModel::find(&db, "app-1", &resource(), "chat.completions")
            .unwrap()
            .unwrap();
        assert_eq!(row.status(), PermissionStatus::Expired);
    }

    #[test]
    fn rate_limit_saturates_window() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.rate_limit = Some(RateLimitModel {
            max_requests: 3,
            window_seconds: 60,
        });

        for _ in 0..3 {
            engine.evaluate(&p, &facts()).unwrap();
        }
        assert!(matches!(
            engine.evaluate(&p, &facts()),
            Err(PolicyError::RateLimited)
        ));

        // The rejected attempt still advanced the counter.
        let now = unix_now();
        let window_start = now / 60 * 60;
        let count = engine
            .kv()
            .counter(&format!("rate:{}:{window_start}", p.id))
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn daily_quota_enforced() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.daily_quota = 2;
        let key = period_key(PeriodType::Daily, Utc::now());
        UsageModel::add(
            &db,
            &p.id,
            UsagePeriod::Daily,
            &key,
            UsageDelta {
                requests: 2,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(matches!(
            engine.evaluate(&p, &facts()),
            Err(PolicyError::DailyQuotaExceeded)
        ));
    }

    #[test]
    fn monthly_quota_enforced() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.monthly_quota = 1;
        let key = period_key(PeriodType::Monthly, Utc::now());
        UsageModel::add(
            &db,
            &p.id,
            UsagePeriod::Monthly,
            &key,
            UsageDelta {
                requests: 1,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(matches!(
            engine.evaluate(&p, &facts()),
            Err(PolicyError::MonthlyQuotaExceeded)
        ));
    }

    #[test]
    fn daily_token_budget_counts_estimate() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.daily_token_budget = 100;
        let key = period_key(PeriodType::Daily, Utc::now());
        UsageModel::add(
            &db,
            &p.id,
            UsagePeriod::Daily,
            &key,
            UsageDelta {
                total_tokens: 90,
                ..Default::default()
            },
        )
        .unwrap();

        let ok = RequestFacts {
            now: Utc::now(),
            input_tokens: 10,
        };
        engine.evaluate(&p, &ok).unwrap();

        let over = RequestFacts {
            now: Utc::now(),
            input_tokens: 11,
        };
        assert!(matches!(
            engine.evaluate(&p, &over),
            Err(PolicyError::DailyTokenBudgetExceeded)
        ));
    }

    #[test]
    fn monthly_token_budget_enforced() {
        let (_tmp, engine, db) = engine();
        let mut p = permission(&db);
        p.monthly_token_budget = 5;
        let over = RequestFacts {
            now: Utc::now(),
            input_tokens: 6,
        };
        assert!(matches!(
            engine.evaluate(&p, &over),
            Err(PolicyError::MonthlyTokenBudgetExceeded)
        ));
    }

    #[test]
    fn time_window_plain_range() {
        let window = TimeWindowModel {
            start_hour: 9,
            end_hour: 17,
            timezone: "UTC".into(),
            allowed_days: vec![],
        };
        let inside = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        let at_start = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2026, 8, 3, 17, 0, 0).unwrap();
        assert!(check_time_window(&window, inside).is_ok());
        assert!(check_time_window(&window, at_start).is_ok());
        assert!(matches!(
            check_time_window(&window, at_end),
            Err(PolicyError::OutsideTimeWindow)
        ));
    }

    #[test]
    fn time_window_wraps_overnight() {
        let window = TimeWindowModel {
            start_hour: 22,
            end_hour: 6,
            timezone: "UTC".into(),
            allowed_days: vec![],
        };
        let late = Utc.with_ymd_and_hms(2026, 8, 3, 23, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 8, 3, 5, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        assert!(check_time_window(&window, late).is_ok());
        assert!(check_time_window(&window, early).is_ok());
        assert!(check_time_window(&window, midday).is_err());
    }

    #[test]
    fn time_window_respects_timezone() {
        let window = TimeWindowModel {
            start_hour: 9,
            end_hour: 17,
            timezone: "America/New_York".into(),
            allowed_days: vec![],
        };
        // 14:00 UTC on 2026-08-03 is 10:00 in New York (EDT).
        let t = Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap();
        assert!(check_time_window(&window, t).is_ok());
        // 02:00 UTC is 22:00 the previous evening in New York.
        let t = Utc.with_ymd_and_hms(2026, 8, 3, 2, 0, 0).unwrap();
        assert!(check_time_window(&window, t).is_err());
    }

    #[test]
    fn allowed_days_use_sunday_zero() {
        let window = TimeWindowModel {
            start_hour: 0,
            end_hour: 24,
            timezone: "UTC".into(),
            // Weekdays only.
            allowed_days: vec![1, 2, 3, 4, 5],
        };
        // 2026-08-02 is a Sunday, 2026-08-03 a Monday.
        let sunday = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        assert!(matches!(
            check_time_window(&window, sunday),
            Err(PolicyError::DayNotAllowed)
        ));
        assert!(check_time_window(&window, monday).is_ok());
    }

    #[test]
    fn unparseable_timezone_falls_back_to_utc() {
        let window = TimeWindowModel {
            start_hour: 0,
            end_hour: 24,
            timezone: "Mars/Olympus_Mons".into(),
            allowed_days: vec![],
        };
        assert!(check_time_window(&window, Utc::now()).is_ok());
    }
}
