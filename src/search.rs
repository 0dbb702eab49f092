//! Search aggregation: AI-grounded search, structured fallback, id
//! resolution, detail fetches with review selection, and city geocoding.
//!
//! Orchestrates two search strategies over quota and cache guards. Upstream
//! failures degrade ("no result from this source"); only conditions that
//! change what the user sees are surfaced, as [`SearchFailure`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CachedSearch, ResultCache};
use crate::config::SearchTuning;
use crate::geo;
use crate::intent;
use crate::providers::{ProviderError, ProviderErrorKind};
use crate::quota::{ApiKind, DenialReason, Provider, QuotaGuard};
use crate::traits::{Clock, GroundedSearch, GroundingRef, PlacesClient};
use crate::types::{is_valid_provider_id, Location, Review, Venue, VenueDetails};
use crate::utils::truncate_str;

/// Which budget blocked a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    User,
    Global,
}

/// A condition that changes what is shown to the user. Everything else is
/// absorbed inside the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFailure {
    /// Budget hit and no cached response to fall back on.
    QuotaExceeded { scope: QuotaScope },
    /// Both search strategies failed or timed out.
    Upstream,
    /// All sources responded, nothing survived filtering.
    NoResults,
}

impl fmt::Display for SearchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFailure::QuotaExceeded { scope: QuotaScope::User } => {
                write!(f, "user daily quota exceeded, no cache available")
            }
            SearchFailure::QuotaExceeded { scope: QuotaScope::Global } => {
                write!(f, "global daily quota exceeded, no cache available")
            }
            SearchFailure::Upstream => write!(f, "all search sources unavailable"),
            SearchFailure::NoResults => write!(f, "no results passed filtering"),
        }
    }
}

/// Prior-turn context attached to general follow-up searches.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub last_query: String,
    /// (name, rating) of previously shown venues.
    pub venues: Vec<(String, Option<f64>)>,
}

/// Aggregated search outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub text: String,
    pub venues: Vec<Venue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_city: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
    /// Set when the response was served from cache because a budget was hit.
    #[serde(default)]
    pub quota_exceeded: bool,
}

pub struct SearchAggregator {
    ai: Arc<dyn GroundedSearch>,
    places: Arc<dyn PlacesClient>,
    quota: Arc<QuotaGuard>,
    cache: Arc<ResultCache>,
    clock: Arc<dyn Clock>,
    tuning: SearchTuning,
    display_language: String,
}

/// Coarse time-of-day bucket carried into the grounding prompt.
pub fn time_bucket(now: DateTime<Utc>) -> &'static str {
    match now.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=22 => "evening",
        _ => "night",
    }
}

const CITY_MARKER: &str = "CITY:";

/// Split a leading "CITY: <name>" marker line out of the model text.
/// "CITY: -" means no city was mentioned.
fn split_city_marker(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix(CITY_MARKER) else {
        return (None, text.to_string());
    };
    let (line, body) = match rest.split_once('\n') {
        Some((line, body)) => (line.trim(), body.trim_start().to_string()),
        None => (rest.trim(), String::new()),
    };
    if line.is_empty() || line == "-" {
        (None, body)
    } else {
        (Some(line.to_string()), body)
    }
}

static URI_PLACE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"place_id[:=]([A-Za-z0-9_-]{20,})").expect("place id pattern")
});
static URI_PLACE_ID_ENCODED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:place_id%3A|query_place_id=)([A-Za-z0-9_-]{20,})").expect("encoded id pattern")
});
static URI_CID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]cid=(\d+)").expect("cid pattern"));
static URI_COORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:@|!3d)(-?\d{1,2}\.\d+)(?:,|!4d)(-?\d{1,3}\.\d+)").expect("uri coords pattern")
});

/// Extract a provider id from a grounding reference. Candidate shapes are
/// tried in a fixed fallback order (direct id field, plain id inside the
/// URI, URL-encoded id, numeric alternate) and every candidate must pass
/// the strict validity check before it is used.
pub fn extract_ref_id(r: &GroundingRef) -> Option<String> {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(id) = &r.place_id {
        candidates.push(id.clone());
    }
    if let Some(uri) = &r.uri {
        if let Some(caps) = URI_PLACE_ID.captures(uri) {
            candidates.push(caps[1].to_string());
        }
        if let Some(caps) = URI_PLACE_ID_ENCODED.captures(uri) {
            candidates.push(caps[1].to_string());
        }
        if let Some(caps) = URI_CID.captures(uri) {
            candidates.push(caps[1].to_string());
        }
    }
    candidates.into_iter().find(|c| is_valid_provider_id(c))
}

/// Coordinates embedded in a maps URI, when present.
fn coords_from_uri(uri: &str) -> Option<Location> {
    let caps = URI_COORDS.captures(uri)?;
    let lat: f64 = caps[1].parse().ok()?;
    let lon: f64 = caps[2].parse().ok()?;
    Some(Location::new(lat, lon))
}

/// Turn grounding references into venue candidates, capped at 5.
fn venues_from_refs(refs: &[GroundingRef]) -> Vec<Venue> {
    refs.iter()
        .filter_map(|r| {
            let name = r.title.as_deref()?.trim();
            if name.is_empty() {
                return None;
            }
            let mut venue = Venue::named(name);
            venue.provider_id = extract_ref_id(r);
            venue.source_uri = r.uri.clone();
            Some(venue)
        })
        .take(5)
        .collect()
}

/// Pick up to 2 negative + 2 positive + 1 neutral review, 5 total.
/// Negative first so critical feedback is never crowded out.
pub fn select_reviews(reviews: &[Review]) -> Vec<Review> {
    let negative = reviews.iter().filter(|r| r.rating <= 2);
    let positive = reviews.iter().filter(|r| r.rating >= 4);
    let neutral = reviews.iter().filter(|r| r.rating == 3);

    let mut selected: Vec<Review> = Vec::with_capacity(5);
    selected.extend(negative.take(2).cloned());
    selected.extend(positive.take(2).cloned());
    selected.extend(neutral.take(1).cloned());
    selected.truncate(5);
    selected
}

fn looks_cyrillic(name: &str) -> bool {
    let mut letters = 0usize;
    let mut cyrillic = 0usize;
    for c in name.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if ('\u{0400}'..='\u{04FF}').contains(&c) {
            cyrillic += 1;
        }
    }
    letters > 0 && cyrillic * 2 > letters
}

impl SearchAggregator {
    pub fn new(
        ai: Arc<dyn GroundedSearch>,
        places: Arc<dyn PlacesClient>,
        quota: Arc<QuotaGuard>,
        cache: Arc<ResultCache>,
        clock: Arc<dyn Clock>,
        tuning: SearchTuning,
        display_language: String,
    ) -> Self {
        Self {
            ai,
            places,
            quota,
            cache,
            clock,
            tuning,
            display_language,
        }
    }

    fn compose_prompt(
        &self,
        query: &str,
        origin: Location,
        context: Option<&TurnContext>,
        preferences: Option<&str>,
    ) -> String {
        let now = self.clock.now();
        let mut prompt = format!(
            "You are a local place-finding assistant. The user is at latitude {:.6}, \
             longitude {:.6}. Time of day: {}. Urgency: {}.\n",
            origin.lat,
            origin.lon,
            time_bucket(now),
            intent::urgency(query).as_str(),
        );
        if let Some(prefs) = preferences {
            prompt.push_str(&format!("User preferences: {}\n", truncate_str(prefs, 300)));
        }
        if let Some(ctx) = context {
            prompt.push_str(&format!("Previous request: {}\n", truncate_str(&ctx.last_query, 200)));
            if !ctx.venues.is_empty() {
                prompt.push_str("Places already shown:\n");
                for (name, rating) in &ctx.venues {
                    match rating {
                        Some(r) => prompt.push_str(&format!("- {} (rating {:.1})\n", name, r)),
                        None => prompt.push_str(&format!("- {}\n", name)),
                    }
                }
            }
        }
        prompt.push_str(&format!(
            "\nIf the request names a city other than the user's current location, start \
             your reply with a single line `{} <city name>`; otherwise start with `{} -`.\n\
             Recommend up to 5 concrete places matching the request, with one short \
             sentence each. Answer in the user's language.\n\nRequest: {}",
            CITY_MARKER, CITY_MARKER, query
        ));
        prompt
    }

    /// Aggregated search. `needed` is set for structured multi-place/route
    /// requests that require a minimum venue count; the fallback ladder also
    /// kicks in automatically when AI grounding returns nothing.
    pub async fn search(
        &self,
        query: &str,
        origin: Location,
        user_id: &str,
        context: Option<&TurnContext>,
        preferences: Option<&str>,
        needed: Option<usize>,
        exclude: &HashSet<String>,
    ) -> Result<SearchResponse, SearchFailure> {
        let now = self.clock.now();
        let decision = self.quota.can_proceed(user_id, Provider::Ai, now).await;

        if !decision.allowed {
            let scope = match decision.reason {
                DenialReason::GlobalLimit => QuotaScope::Global,
                _ => QuotaScope::User,
            };
            return match self.cache.get_search(query, origin).await {
                Some(cached) => {
                    info!(user_id, "quota exceeded; serving cached search response");
                    self.quota
                        .record_call(user_id, Provider::Ai, ApiKind::GroundedGenerate, true, true, now)
                        .await;
                    Ok(SearchResponse {
                        text: cached.text,
                        venues: cached.venues,
                        extracted_city: None,
                        from_cache: true,
                        quota_exceeded: true,
                    })
                }
                None => {
                    self.quota
                        .record_call(user_id, Provider::Ai, ApiKind::GroundedGenerate, false, true, now)
                        .await;
                    Err(SearchFailure::QuotaExceeded { scope })
                }
            };
        }

        // Cache is consulted even when quota allows, to minimize cost.
        if let Some(cached) = self.cache.get_search(query, origin).await {
            self.quota
                .record_call(user_id, Provider::Ai, ApiKind::GroundedGenerate, true, false, now)
                .await;
            return Ok(SearchResponse {
                text: cached.text,
                venues: cached.venues,
                extracted_city: None,
                from_cache: true,
                quota_exceeded: false,
            });
        }

        let prompt = self.compose_prompt(query, origin, context, preferences);
        let mut ai_failed = false;
        let (text, mut extracted_city, mut venues) =
            match self.ai.generate(&prompt, Some(origin)).await {
                Ok(resp) => {
                    self.quota
                        .record_call(user_id, Provider::Ai, ApiKind::GroundedGenerate, false, false, now)
                        .await;
                    let (city, body) = split_city_marker(&resp.text);
                    (body, city, venues_from_refs(&resp.refs))
                }
                Err(e) => {
                    warn!(error = %e, "grounded search failed; falling back to structured search");
                    self.quota
                        .record_call(user_id, Provider::Ai, ApiKind::GroundedGenerate, false, false, now)
                        .await;
                    ai_failed = true;
                    (String::new(), None, Vec::new())
                }
            };

        let unseen = |vs: &[Venue]| {
            vs.iter()
                .filter(|v| {
                    v.provider_id
                        .as_ref()
                        .map(|id| !exclude.contains(id))
                        .unwrap_or(true)
                })
                .count()
        };

        // A structured request needs a minimum count; a grounding miss needs
        // anything at all.
        let target = needed.unwrap_or(if venues.is_empty() {
            self.tuning.min_results
        } else {
            0
        });
        if unseen(&venues) < target {
            let fallback = self
                .fallback_search(origin, query, target, exclude, user_id)
                .await;
            venues.extend(fallback);
            venues = geo::dedupe_by_id(venues);
        }

        venues.retain(|v| {
            v.provider_id
                .as_ref()
                .map(|id| !exclude.contains(id))
                .unwrap_or(true)
        });

        if venues.is_empty() && text.is_empty() {
            return if ai_failed {
                Err(SearchFailure::Upstream)
            } else {
                Err(SearchFailure::NoResults)
            };
        }

        if extracted_city.is_none() {
            extracted_city = intent::extract_city(query);
        }

        self.cache
            .put_search(
                query,
                origin,
                &CachedSearch {
                    text: text.clone(),
                    venues: venues.clone(),
                },
            )
            .await;

        debug!(venues = venues.len(), from_ai = !ai_failed, "aggregated search done");
        Ok(SearchResponse {
            text,
            venues,
            extracted_city,
            from_cache: false,
            quota_exceeded: false,
        })
    }

    /// Radius-expanding structured fallback: nearby at the base radius, then
    /// escalate through the ladder with flexible text search, accumulating,
    /// deduplicating, and re-filtering to the maximum radius after each step.
    /// Stops early once enough unseen results are collected.
    async fn fallback_search(
        &self,
        origin: Location,
        keyword: &str,
        needed: usize,
        exclude: &HashSet<String>,
        user_id: &str,
    ) -> Vec<Venue> {
        let now = self.clock.now();
        if !self
            .quota
            .can_proceed(user_id, Provider::Places, now)
            .await
            .allowed
        {
            warn!(user_id, "places quota exhausted; skipping structured fallback");
            return Vec::new();
        }
        let wanted = needed.max(self.tuning.min_results);

        let mut acc: Vec<Venue> = match self
            .places
            .nearby(origin, self.tuning.base_radius_m, keyword)
            .await
        {
            Ok(venues) => {
                self.quota
                    .record_call(user_id, Provider::Places, ApiKind::NearbySearch, false, false, now)
                    .await;
                venues
            }
            Err(e) => {
                warn!(error = %e, "nearby search failed");
                Vec::new()
            }
        };
        acc = geo::filter_within_radius(acc, origin, self.tuning.max_radius_m as f64);

        let unseen = |vs: &[Venue]| {
            vs.iter()
                .filter(|v| {
                    v.provider_id
                        .as_ref()
                        .map(|id| !exclude.contains(id))
                        .unwrap_or(true)
                })
                .count()
        };

        for &radius in &self.tuning.radius_ladder_m {
            if unseen(&acc) >= wanted {
                break;
            }
            match self.places.text_search(keyword, origin, radius).await {
                Ok(more) => {
                    self.quota
                        .record_call(user_id, Provider::Places, ApiKind::TextSearch, false, false, now)
                        .await;
                    acc.extend(more);
                    acc = geo::dedupe_by_id(acc);
                    acc = geo::filter_within_radius(acc, origin, self.tuning.max_radius_m as f64);
                }
                Err(e) => {
                    warn!(radius, error = %e, "text search escalation failed");
                }
            }
        }

        acc.retain(|v| {
            v.provider_id
                .as_ref()
                .map(|id| !exclude.contains(id))
                .unwrap_or(true)
        });
        acc = geo::sort_by_distance(acc, origin);
        acc.truncate(wanted.max(self.tuning.page_size));
        acc
    }

    /// Three-tier best-effort id resolution: name+address text search,
    /// coordinates pulled from the source URI plus a tight-radius nearby
    /// lookup, then a name-only text search as last resort.
    pub async fn resolve_provider_id(
        &self,
        name: &str,
        address: Option<&str>,
        source_uri: Option<&str>,
        origin: Location,
        user_id: &str,
    ) -> Option<String> {
        let now = self.clock.now();
        if !self
            .quota
            .can_proceed(user_id, Provider::Places, now)
            .await
            .allowed
        {
            return None;
        }

        if let Some(address) = address {
            let query = format!("{} {}", name, address);
            if let Ok(venues) = self
                .places
                .text_search(&query, origin, self.tuning.max_radius_m)
                .await
            {
                self.quota
                    .record_call(user_id, Provider::Places, ApiKind::TextSearch, false, false, now)
                    .await;
                if let Some(id) = first_valid_id(&venues) {
                    return Some(id);
                }
            }
        }

        if let Some(coords) = source_uri.and_then(coords_from_uri) {
            if let Ok(venues) = self.places.nearby(coords, 150, name).await {
                self.quota
                    .record_call(user_id, Provider::Places, ApiKind::NearbySearch, false, false, now)
                    .await;
                if let Some(id) = first_valid_id(&venues) {
                    return Some(id);
                }
            }
        }

        match self
            .places
            .text_search(name, origin, self.tuning.max_radius_m)
            .await
        {
            Ok(venues) => {
                self.quota
                    .record_call(user_id, Provider::Places, ApiKind::TextSearch, false, false, now)
                    .await;
                first_valid_id(&venues)
            }
            Err(e) => {
                debug!(name, error = %e, "id resolution exhausted all tiers");
                None
            }
        }
    }

    /// Detail fetch. Cache applies only to review-free fetches, which keeps
    /// the detail cache free of heavy payloads. When reviews are requested
    /// they are bucketed by sentiment, sampled, and translated; translation
    /// failures degrade to the original text. An invalid-request error with
    /// reviews triggers one retry without them.
    pub async fn get_venue_details(
        &self,
        place_id: &str,
        include_reviews: bool,
        user_id: &str,
    ) -> anyhow::Result<VenueDetails> {
        let now = self.clock.now();
        if !include_reviews {
            if let Some(venue) = self.cache.get_venue_details(place_id).await {
                self.quota
                    .record_call(user_id, Provider::Places, ApiKind::Details, true, false, now)
                    .await;
                return Ok(VenueDetails {
                    venue,
                    reviews: Vec::new(),
                });
            }
        }
        if !self
            .quota
            .can_proceed(user_id, Provider::Places, now)
            .await
            .allowed
        {
            anyhow::bail!("places daily quota exceeded");
        }

        let details = match self.places.details(place_id, include_reviews).await {
            Ok(d) => d,
            Err(e) if include_reviews && is_invalid_request(&e) => {
                warn!(place_id, "details with reviews rejected; retrying without reviews");
                self.places.details(place_id, false).await?
            }
            Err(e) => return Err(e),
        };
        self.quota
            .record_call(user_id, Provider::Places, ApiKind::Details, false, false, now)
            .await;

        if !include_reviews {
            self.cache.put_venue_details(place_id, &details.venue).await;
            return Ok(details);
        }

        let mut translated = Vec::new();
        for review in select_reviews(&details.reviews) {
            let text = match self
                .ai
                .translate(&review.text, &self.display_language)
                .await
            {
                Ok(t) => {
                    self.quota
                        .record_call(user_id, Provider::Ai, ApiKind::Translate, false, false, now)
                        .await;
                    t
                }
                Err(e) => {
                    debug!(error = %e, "review translation failed; keeping original");
                    review.text.clone()
                }
            };
            translated.push(Review {
                rating: review.rating,
                text,
            });
        }
        Ok(VenueDetails {
            venue: details.venue,
            reviews: translated,
        })
    }

    /// City → coordinates. Optional enhancement: quota denial or any upstream
    /// trouble yields None, never an error.
    pub async fn geocode_city(&self, name: &str, user_id: &str) -> Option<Location> {
        if let Some(location) = self.cache.get_geocode(name).await {
            return Some(location);
        }
        let now = self.clock.now();
        if !self
            .quota
            .can_proceed(user_id, Provider::Geocoding, now)
            .await
            .allowed
        {
            return None;
        }

        let mut results = match self.places.geocode(name).await {
            Ok(r) => {
                self.quota
                    .record_call(user_id, Provider::Geocoding, ApiKind::Geocode, false, false, now)
                    .await;
                r
            }
            Err(e) => {
                warn!(name, error = %e, "geocoding failed");
                Vec::new()
            }
        };

        // A Cyrillic name that resolved to nothing is usually a Russian city
        // missing its country qualifier.
        if results.is_empty() && looks_cyrillic(name) {
            let qualified = format!("{}, Россия", name);
            if let Ok(r) = self.places.geocode(&qualified).await {
                self.quota
                    .record_call(user_id, Provider::Geocoding, ApiKind::Geocode, false, false, now)
                    .await;
                results = r;
            }
        }

        let chosen = results
            .iter()
            .find(|r| r.is_locality())
            .or_else(|| results.first())?;
        let location = chosen.location;
        self.cache.put_geocode(name, location).await;
        Some(location)
    }
}

fn first_valid_id(venues: &[Venue]) -> Option<String> {
    venues
        .iter()
        .filter_map(|v| v.provider_id.as_deref())
        .find(|id| is_valid_provider_id(id))
        .map(str::to_string)
}

fn is_invalid_request(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ProviderError>()
        .is_some_and(|pe| pe.kind == ProviderErrorKind::InvalidRequest)
}
