//! In-memory fakes and mock providers shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::cache::ResultCache;
use crate::config::{CacheConfig, QuotaConfig, SearchTuning};
use crate::orchestrator::DialogueOrchestrator;
use crate::quota::QuotaGuard;
use crate::search::SearchAggregator;
use crate::session::ConversationSession;
use crate::traits::{
    CacheStore, CallRecord, Clock, GeocodeResult, GroundedResponse, GroundedSearch, GroundingRef,
    PlacesClient, SessionStore, UsageStore,
};
use crate::types::{Location, Venue, VenueDetails};

/// Deterministic clock starting at a fixed instant; tests advance it by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            // Saturday noon UTC, mid-afternoon in Moscow.
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 6, 14, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// One in-memory store implementing all three persistence traits, with
/// switchable read failures for degradation tests.
pub struct MemoryStore {
    cache: Mutex<HashMap<(String, String), (String, DateTime<Utc>)>>,
    calls: Mutex<Vec<CallRecord>>,
    sessions: Mutex<HashMap<String, ConversationSession>>,
    fail_cache: AtomicBool,
    fail_usage: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            fail_cache: AtomicBool::new(false),
            fail_usage: AtomicBool::new(false),
        }
    }

    /// All subsequent cache reads return an error.
    pub fn fail_cache_reads(&self) {
        self.fail_cache.store(true, Ordering::SeqCst);
    }

    /// All subsequent usage-ledger reads return an error.
    pub fn fail_usage_reads(&self) {
        self.fail_usage.store(true, Ordering::SeqCst);
    }

    pub fn recorded_calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn session(&self, user_id: &str) -> Option<ConversationSession> {
        self.sessions.lock().unwrap().get(user_id).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, kind: &str, key: &str) -> anyhow::Result<Option<(String, DateTime<Utc>)>> {
        if self.fail_cache.load(Ordering::SeqCst) {
            return Err(anyhow!("cache store offline"));
        }
        Ok(self
            .cache
            .lock()
            .unwrap()
            .get(&(kind.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        kind: &str,
        key: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.cache
            .lock()
            .unwrap()
            .insert((kind.to_string(), key.to_string()), (payload.to_string(), now));
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn global_calls(&self, provider: &str, day: &str) -> anyhow::Result<i64> {
        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(anyhow!("usage store offline"));
        }
        Ok(self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.provider == provider && c.day == day && !c.from_cache && !c.quota_exceeded)
            .count() as i64)
    }

    async fn user_calls(&self, user_id: &str, provider: &str, day: &str) -> anyhow::Result<i64> {
        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(anyhow!("usage store offline"));
        }
        Ok(self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| {
                c.user_id == user_id
                    && c.provider == provider
                    && c.day == day
                    && !c.from_cache
                    && !c.quota_exceeded
            })
            .count() as i64)
    }

    async fn append_call(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, user_id: &str) -> anyhow::Result<Option<ConversationSession>> {
        Ok(self.sessions.lock().unwrap().get(user_id).cloned())
    }

    async fn put_session(&self, session: &ConversationSession) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.user_id.clone(), session.clone());
        Ok(())
    }
}

/// Scripted grounded-search provider: responses are consumed FIFO, prompts
/// are recorded, translation is a counted passthrough.
pub struct MockGroundedSearch {
    responses: Mutex<VecDeque<anyhow::Result<GroundedResponse>>>,
    prompts: Mutex<Vec<String>>,
    translate_calls: AtomicUsize,
}

impl MockGroundedSearch {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            translate_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_response(&self, response: GroundedResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow!("{}", message)));
    }

    pub fn generate_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroundedSearch for MockGroundedSearch {
    async fn generate(
        &self,
        prompt: &str,
        _location_bias: Option<Location>,
    ) -> anyhow::Result<GroundedResponse> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(GroundedResponse {
                text: String::new(),
                refs: Vec::new(),
            })
        })
    }

    async fn translate(&self, text: &str, _target_lang: &str) -> anyhow::Result<String> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.to_string())
    }
}

/// Scripted places client with separate FIFO queues per endpoint. Empty
/// search queues answer with no results; an empty details queue errors.
pub struct MockPlacesClient {
    nearby: Mutex<VecDeque<anyhow::Result<Vec<Venue>>>>,
    text_search: Mutex<VecDeque<anyhow::Result<Vec<Venue>>>>,
    details: Mutex<VecDeque<anyhow::Result<VenueDetails>>>,
    geocode: Mutex<VecDeque<anyhow::Result<Vec<GeocodeResult>>>>,
    nearby_log: Mutex<Vec<(Location, u32, String)>>,
    text_search_log: Mutex<Vec<(String, u32)>>,
    details_log: Mutex<Vec<(String, bool)>>,
    geocode_log: Mutex<Vec<String>>,
}

impl MockPlacesClient {
    pub fn new() -> Self {
        Self {
            nearby: Mutex::new(VecDeque::new()),
            text_search: Mutex::new(VecDeque::new()),
            details: Mutex::new(VecDeque::new()),
            geocode: Mutex::new(VecDeque::new()),
            nearby_log: Mutex::new(Vec::new()),
            text_search_log: Mutex::new(Vec::new()),
            details_log: Mutex::new(Vec::new()),
            geocode_log: Mutex::new(Vec::new()),
        }
    }

    pub fn push_nearby(&self, venues: Vec<Venue>) {
        self.nearby.lock().unwrap().push_back(Ok(venues));
    }

    pub fn push_text_search(&self, venues: Vec<Venue>) {
        self.text_search.lock().unwrap().push_back(Ok(venues));
    }

    pub fn push_details(&self, details: VenueDetails) {
        self.details.lock().unwrap().push_back(Ok(details));
    }

    pub fn push_details_error(&self, error: anyhow::Error) {
        self.details.lock().unwrap().push_back(Err(error));
    }

    pub fn push_geocode(&self, results: Vec<GeocodeResult>) {
        self.geocode.lock().unwrap().push_back(Ok(results));
    }

    pub fn nearby_calls(&self) -> usize {
        self.nearby_log.lock().unwrap().len()
    }

    pub fn text_search_calls(&self) -> usize {
        self.text_search_log.lock().unwrap().len()
    }

    pub fn details_calls(&self) -> Vec<(String, bool)> {
        self.details_log.lock().unwrap().clone()
    }

    pub fn geocode_calls(&self) -> Vec<String> {
        self.geocode_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlacesClient for MockPlacesClient {
    async fn nearby(
        &self,
        location: Location,
        radius_m: u32,
        keyword: &str,
    ) -> anyhow::Result<Vec<Venue>> {
        self.nearby_log
            .lock()
            .unwrap()
            .push((location, radius_m, keyword.to_string()));
        self.nearby
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn text_search(
        &self,
        query: &str,
        _location: Location,
        radius_m: u32,
    ) -> anyhow::Result<Vec<Venue>> {
        self.text_search_log
            .lock()
            .unwrap()
            .push((query.to_string(), radius_m));
        self.text_search
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn details(
        &self,
        place_id: &str,
        include_reviews: bool,
    ) -> anyhow::Result<VenueDetails> {
        self.details_log
            .lock()
            .unwrap()
            .push((place_id.to_string(), include_reviews));
        self.details
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted details for {}", place_id)))
    }

    async fn geocode(&self, address: &str) -> anyhow::Result<Vec<GeocodeResult>> {
        self.geocode_log.lock().unwrap().push(address.to_string());
        self.geocode
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Fully wired orchestrator over in-memory stores and scripted providers.
pub struct TestHarness {
    pub orchestrator: DialogueOrchestrator,
    pub ai: Arc<MockGroundedSearch>,
    pub places: Arc<MockPlacesClient>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        let ai = Arc::new(MockGroundedSearch::new());
        let places = Arc::new(MockPlacesClient::new());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());

        let quota = Arc::new(QuotaGuard::new(store.clone(), QuotaConfig::default()));
        let cache = Arc::new(ResultCache::new(
            store.clone(),
            clock.clone(),
            &CacheConfig::default(),
        ));
        let tuning = SearchTuning::default();
        let aggregator = Arc::new(SearchAggregator::new(
            ai.clone(),
            places.clone(),
            quota,
            cache,
            clock.clone(),
            tuning.clone(),
            "ru".to_string(),
        ));
        let orchestrator = DialogueOrchestrator::new(
            aggregator,
            store.clone(),
            clock.clone(),
            Duration::minutes(30),
            tuning,
        );

        Self {
            orchestrator,
            ai,
            places,
            store,
            clock,
        }
    }

    /// A grounding reference carrying a valid provider id.
    pub fn grounding_ref(title: &str, id: &str) -> GroundingRef {
        GroundingRef {
            title: Some(title.to_string()),
            uri: Some(format!(
                "https://www.google.com/maps/search/?api=1&query_place_id={}",
                id
            )),
            place_id: Some(id.to_string()),
        }
    }

    pub fn venue(id: &str, name: &str, lat: f64, lon: f64) -> Venue {
        let mut v = Venue::named(name);
        v.provider_id = Some(id.to_string());
        v.location = Some(Location::new(lat, lon));
        v.rating = Some(4.4);
        v.types = vec!["cafe".to_string()];
        v
    }
}
