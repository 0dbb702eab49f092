//! Capability and storage seams.
//!
//! Upstream providers (AI grounded search, structured place search) and the
//! backing stores (cache, usage ledger, sessions) are all consumed through
//! these traits so the orchestration core can be wired against HTTP adapters
//! in production and scripted mocks in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::session::ConversationSession;
use crate::types::{Location, Venue, VenueDetails};

/// A citation-style pointer to a real-world place returned by the AI search.
#[derive(Debug, Clone, Default)]
pub struct GroundingRef {
    pub title: Option<String>,
    pub uri: Option<String>,
    /// Direct place id, when the provider surfaces one.
    pub place_id: Option<String>,
}

/// Output of one grounded generation call.
#[derive(Debug, Clone, Default)]
pub struct GroundedResponse {
    pub text: String,
    pub refs: Vec<GroundingRef>,
}

/// AI grounded search + translation capability. May fail or time out; callers
/// treat any error as "no result from this source".
#[async_trait]
pub trait GroundedSearch: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        location_bias: Option<Location>,
    ) -> anyhow::Result<GroundedResponse>;

    /// Translate `text` into `target_lang`. Failures degrade to the original
    /// text at the call site, never abort a response.
    async fn translate(&self, text: &str, target_lang: &str) -> anyhow::Result<String>;
}

/// One geocoding candidate.
#[derive(Debug, Clone)]
pub struct GeocodeResult {
    pub location: Location,
    pub formatted_address: String,
    pub types: Vec<String>,
}

impl GeocodeResult {
    pub fn is_locality(&self) -> bool {
        self.types.iter().any(|t| t == "locality")
    }
}

/// Structured place search capability. Adapters map provider-level non-OK /
/// zero-results statuses to empty vectors or classified errors; they never
/// panic the turn.
#[async_trait]
pub trait PlacesClient: Send + Sync {
    async fn nearby(
        &self,
        location: Location,
        radius_m: u32,
        keyword: &str,
    ) -> anyhow::Result<Vec<Venue>>;

    async fn text_search(
        &self,
        query: &str,
        location: Location,
        radius_m: u32,
    ) -> anyhow::Result<Vec<Venue>>;

    async fn details(&self, place_id: &str, include_reviews: bool)
        -> anyhow::Result<VenueDetails>;

    async fn geocode(&self, address: &str) -> anyhow::Result<Vec<GeocodeResult>>;
}

/// Raw cache rows: payload plus write time. TTL interpretation lives in
/// `cache::ResultCache`, not in the store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, kind: &str, key: &str) -> anyhow::Result<Option<(String, DateTime<Utc>)>>;
    async fn put(&self, kind: &str, key: &str, payload: &str, now: DateTime<Utc>)
        -> anyhow::Result<()>;
}

/// One row in the API-call ledger.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub user_id: String,
    pub provider: String,
    pub api_type: String,
    /// Static USD estimate, for reporting only.
    pub cost: f64,
    pub from_cache: bool,
    pub quota_exceeded: bool,
    pub day: String,
    pub created_at: DateTime<Utc>,
}

/// Call counting + ledger persistence behind the quota guard.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Genuine upstream calls (not cache hits) for (provider, day).
    async fn global_calls(&self, provider: &str, day: &str) -> anyhow::Result<i64>;
    /// Genuine upstream calls for (user, provider, day).
    async fn user_calls(&self, user_id: &str, provider: &str, day: &str) -> anyhow::Result<i64>;
    async fn append_call(&self, record: &CallRecord) -> anyhow::Result<()>;
}

/// Per-user session persistence with get/replace-by-key semantics.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, user_id: &str) -> anyhow::Result<Option<ConversationSession>>;
    async fn put_session(&self, session: &ConversationSession) -> anyhow::Result<()>;
}

/// Injectable time source so TTL behavior is testable with a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production wiring.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
