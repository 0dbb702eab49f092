//! Content-addressed cache for search results, place details, and geocoding.
//!
//! Failure policy: every read and write here is best-effort.
//! A storage failure reads as a miss and writes are swallowed
//! after a `warn!`; cache trouble never propagates into a turn.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CacheConfig;
use crate::traits::{CacheStore, Clock};
use crate::types::{Location, Venue};

const KIND_SEARCH: &str = "search";
const KIND_DETAILS: &str = "details";
const KIND_GEOCODE: &str = "geocode";

/// Cached aggregated search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSearch {
    pub text: String,
    pub venues: Vec<Venue>,
}

/// Search keys round the location to 0.01 degrees (~1 km); nearby requests
/// for the same normalized query share an entry.
fn search_key(query: &str, location: Location) -> String {
    format!(
        "{}|{:.2}|{:.2}",
        query.trim().to_lowercase(),
        location.lat,
        location.lon
    )
}

fn city_key(city: &str) -> String {
    city.trim().to_lowercase()
}

pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    search_ttl: Duration,
    details_ttl: Duration,
    /// None = effectively permanent (cities don't move).
    geocode_ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            store,
            clock,
            search_ttl: Duration::seconds(config.search_ttl_secs as i64),
            details_ttl: Duration::seconds(config.details_ttl_secs as i64),
            geocode_ttl: config
                .geocode_ttl_secs
                .map(|s| Duration::seconds(s as i64)),
        }
    }

    async fn get_fresh<T: for<'de> Deserialize<'de>>(
        &self,
        kind: &str,
        key: &str,
        ttl: Option<Duration>,
    ) -> Option<T> {
        let row = match self.store.get(kind, key).await {
            Ok(row) => row?,
            Err(e) => {
                warn!(kind, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        let (payload, stored_at) = row;
        if let Some(ttl) = ttl {
            if self.clock.now() - stored_at > ttl {
                return None;
            }
        }
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(kind, error = %e, "cache payload failed to decode; treating as miss");
                None
            }
        }
    }

    async fn put_json<T: Serialize>(&self, kind: &str, key: &str, value: &T) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(kind, error = %e, "cache payload failed to encode; skipping write");
                return;
            }
        };
        if let Err(e) = self
            .store
            .put(kind, key, &payload, self.clock.now())
            .await
        {
            warn!(kind, error = %e, "cache write failed; continuing");
        }
    }

    pub async fn get_search(&self, query: &str, location: Location) -> Option<CachedSearch> {
        self.get_fresh(KIND_SEARCH, &search_key(query, location), Some(self.search_ttl))
            .await
    }

    pub async fn put_search(&self, query: &str, location: Location, response: &CachedSearch) {
        self.put_json(KIND_SEARCH, &search_key(query, location), response)
            .await
    }

    /// Details are only cached when fetched without reviews, which keeps the
    /// detail cache free of heavy review payloads. Callers enforce that.
    pub async fn get_venue_details(&self, place_id: &str) -> Option<Venue> {
        self.get_fresh(KIND_DETAILS, place_id, Some(self.details_ttl))
            .await
    }

    pub async fn put_venue_details(&self, place_id: &str, venue: &Venue) {
        self.put_json(KIND_DETAILS, place_id, venue).await
    }

    pub async fn get_geocode(&self, city: &str) -> Option<Location> {
        self.get_fresh(KIND_GEOCODE, &city_key(city), self.geocode_ttl)
            .await
    }

    pub async fn put_geocode(&self, city: &str, location: Location) {
        self.put_json(KIND_GEOCODE, &city_key(city), &location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MemoryStore};

    fn cache_with(clock: Arc<ManualClock>, store: Arc<MemoryStore>) -> ResultCache {
        ResultCache::new(store, clock, &CacheConfig::default())
    }

    fn loc() -> Location {
        Location::new(55.7558, 37.6176)
    }

    #[tokio::test]
    async fn search_round_trip_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(clock.clone(), Arc::new(MemoryStore::new()));

        let response = CachedSearch {
            text: "кафе рядом".into(),
            venues: vec![Venue::named("Кафе")],
        };
        cache.put_search("Найди Кафе ", loc(), &response).await;

        // Normalized key: case/whitespace-insensitive, location rounded.
        let hit = cache
            .get_search("найди кафе", Location::new(55.7561, 37.6179))
            .await
            .expect("cache hit");
        assert_eq!(hit.text, "кафе рядом");
        assert_eq!(hit.venues.len(), 1);
    }

    #[tokio::test]
    async fn search_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(clock.clone(), Arc::new(MemoryStore::new()));

        let response = CachedSearch {
            text: "x".into(),
            venues: vec![],
        };
        cache.put_search("кафе", loc(), &response).await;
        clock.advance(Duration::hours(4) + Duration::seconds(1));
        assert!(cache.get_search("кафе", loc()).await.is_none());
    }

    #[tokio::test]
    async fn distant_location_is_a_different_key() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(clock, Arc::new(MemoryStore::new()));

        let response = CachedSearch {
            text: "x".into(),
            venues: vec![],
        };
        cache.put_search("кафе", loc(), &response).await;
        assert!(cache
            .get_search("кафе", Location::new(59.93, 30.36))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn geocode_never_expires_by_default() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(clock.clone(), Arc::new(MemoryStore::new()));

        cache.put_geocode("Москва", loc()).await;
        clock.advance(Duration::days(365));
        assert_eq!(cache.get_geocode("  москва ").await, Some(loc()));
    }

    #[tokio::test]
    async fn store_failure_reads_as_miss() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(clock, store.clone());

        cache.put_geocode("Казань", loc()).await;
        store.fail_cache_reads();
        assert!(cache.get_geocode("Казань").await.is_none());
    }
}
