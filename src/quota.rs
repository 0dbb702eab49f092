//! Per-provider daily call budgets.
//!
//! Failure policy: `can_proceed` fails open. Any
//! backing-store error yields `allowed = true`. `record_call` swallows store
//! errors after logging; the ledger is a non-critical path and must never
//! fail a user-facing turn.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{ProviderLimits, QuotaConfig};
use crate::traits::{CallRecord, UsageStore};

/// Upstream providers tracked by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ai,
    Places,
    Geocoding,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ai => "ai",
            Provider::Places => "places",
            Provider::Geocoding => "geocoding",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call types within a provider, for the cost ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    GroundedGenerate,
    Translate,
    NearbySearch,
    TextSearch,
    Details,
    Geocode,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKind::GroundedGenerate => "grounded_generate",
            ApiKind::Translate => "translate",
            ApiKind::NearbySearch => "nearby_search",
            ApiKind::TextSearch => "text_search",
            ApiKind::Details => "details",
            ApiKind::Geocode => "geocode",
        }
    }
}

/// Static per-(provider, call-type) USD estimate. Reporting only, never
/// enforcement.
pub fn estimated_cost(provider: Provider, api: ApiKind) -> f64 {
    match (provider, api) {
        (Provider::Ai, ApiKind::GroundedGenerate) => 0.035,
        (Provider::Ai, ApiKind::Translate) => 0.002,
        (Provider::Places, ApiKind::NearbySearch) => 0.032,
        (Provider::Places, ApiKind::TextSearch) => 0.032,
        (Provider::Places, ApiKind::Details) => 0.017,
        (Provider::Geocoding, ApiKind::Geocode) => 0.005,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    None,
    UserLimit,
    GlobalLimit,
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: DenialReason,
    /// Calls left for this user today (0 when denied).
    pub remaining: i64,
}

impl QuotaDecision {
    fn allowed(remaining: i64) -> Self {
        Self {
            allowed: true,
            reason: DenialReason::None,
            remaining,
        }
    }

    fn denied(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason,
            remaining: 0,
        }
    }
}

pub struct QuotaGuard {
    store: Arc<dyn UsageStore>,
    limits: QuotaConfig,
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn UsageStore>, limits: QuotaConfig) -> Self {
        Self { store, limits }
    }

    fn limits_for(&self, provider: Provider) -> ProviderLimits {
        match provider {
            Provider::Ai => self.limits.ai,
            Provider::Places => self.limits.places,
            Provider::Geocoding => self.limits.geocoding,
        }
    }

    /// Check the global daily budget before the per-user one; the call is
    /// blocked the instant either threshold is reached. Store errors fail
    /// open: availability wins over strict enforcement.
    pub async fn can_proceed(
        &self,
        user_id: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let limits = self.limits_for(provider);
        let day = day_key(now);

        let global = match self.store.global_calls(provider.as_str(), &day).await {
            Ok(n) => n,
            Err(e) => {
                warn!(provider = %provider, error = %e, "quota store read failed; failing open");
                return QuotaDecision::allowed(limits.user_daily);
            }
        };
        if global >= limits.global_daily {
            return QuotaDecision::denied(DenialReason::GlobalLimit);
        }

        let user = match self
            .store
            .user_calls(user_id, provider.as_str(), &day)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(provider = %provider, error = %e, "quota store read failed; failing open");
                return QuotaDecision::allowed(limits.user_daily);
            }
        };
        if user >= limits.user_daily {
            return QuotaDecision::denied(DenialReason::UserLimit);
        }

        QuotaDecision::allowed(limits.user_daily - user)
    }

    /// Append one ledger row. Cache hits and quota denials carry zero cost
    /// and never count against budgets. Never returns an error.
    pub async fn record_call(
        &self,
        user_id: &str,
        provider: Provider,
        api: ApiKind,
        from_cache: bool,
        quota_exceeded: bool,
        now: DateTime<Utc>,
    ) {
        let record = CallRecord {
            user_id: user_id.to_string(),
            provider: provider.as_str().to_string(),
            api_type: api.as_str().to_string(),
            cost: if from_cache || quota_exceeded {
                0.0
            } else {
                estimated_cost(provider, api)
            },
            from_cache,
            quota_exceeded,
            day: day_key(now),
            created_at: now,
        };
        if let Err(e) = self.store.append_call(&record).await {
            warn!(provider = %provider, error = %e, "failed to record API call; continuing");
        }
    }
}
