//! Dialogue orchestration: turns an utterance plus session state into a
//! transport-agnostic response descriptor.
//!
//! Intent precedence per turn: location share, then route requests, then
//! follow-ups over shown results, then a fresh search. Everything user-facing
//! is rendered here; providers and stores stay behind the aggregator.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::SearchTuning;
use crate::geo;
use crate::intent::{self, FollowUpKind};
use crate::ranking;
use crate::search::{SearchAggregator, SearchFailure, TurnContext};
use crate::session::{ConversationSession, DialogueMode, ResultWindow};
use crate::traits::{Clock, SessionStore};
use crate::types::{Button, Location, ResponseDescriptor, Venue, VenueDetails};
use crate::utils::truncate_str;

const CB_MORE: &str = "more";
const CB_ROUTE: &str = "route";
const CB_DETAIL_PREFIX: &str = "detail:";

const MSG_NEED_LOCATION: &str =
    "Поделитесь геопозицией, чтобы я могла искать места рядом с вами.";
const MSG_LOCATION_SAVED: &str =
    "Локация получена! Что ищем? Например: «кофейня рядом» или «где поужинать».";
const MSG_QUOTA: &str =
    "Дневной лимит запросов исчерпан. Попробуйте снова завтра.";
const MSG_UPSTREAM: &str =
    "Сервисы поиска сейчас недоступны. Попробуйте чуть позже.";
const MSG_NO_RESULTS: &str =
    "Ничего подходящего не нашлось. Попробуйте переформулировать запрос.";
const MSG_NO_MORE: &str = "Больше ничего не нашлось по этому запросу.";
const MSG_WHICH_PLACE: &str =
    "Уточните, пожалуйста, о каком месте из списка речь (например, «о втором»).";
const MSG_BAD_INDEX: &str = "В списке нет места с таким номером.";
const MSG_DETAILS_FAILED: &str =
    "Не удалось получить подробности об этом месте. Попробуйте позже.";
const MSG_FROM_CACHE_QUOTA: &str =
    "(лимит на сегодня исчерпан, показываю сохранённый результат)\n\n";

pub struct DialogueOrchestrator {
    aggregator: Arc<SearchAggregator>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    location_ttl: Duration,
    tuning: SearchTuning,
}

impl DialogueOrchestrator {
    pub fn new(
        aggregator: Arc<SearchAggregator>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        location_ttl: Duration,
        tuning: SearchTuning,
    ) -> Self {
        Self {
            aggregator,
            sessions,
            clock,
            location_ttl,
            tuning,
        }
    }

    async fn load_session(&self, user_id: &str) -> ConversationSession {
        match self.sessions.get_session(user_id).await {
            Ok(Some(session)) => session,
            Ok(None) => ConversationSession::new(user_id),
            Err(e) => {
                warn!(user_id, error = %e, "session load failed; starting fresh");
                ConversationSession::new(user_id)
            }
        }
    }

    async fn save_session(&self, session: &ConversationSession) {
        if let Err(e) = self.sessions.put_session(session).await {
            warn!(user_id = %session.user_id, error = %e, "session save failed");
        }
    }

    /// A shared location replaces the previous snapshot and resets the
    /// "already seen" history for the new validity window.
    pub async fn handle_location(&self, user_id: &str, location: Location) -> ResponseDescriptor {
        let mut session = self.load_session(user_id).await;
        session.record_location(location, self.clock.now());
        self.save_session(&session).await;
        info!(user_id, "location updated");
        ResponseDescriptor::text(MSG_LOCATION_SAVED)
    }

    pub async fn handle_message(&self, user_id: &str, text: &str) -> ResponseDescriptor {
        let mut session = self.load_session(user_id).await;
        let now = self.clock.now();

        let route_intent = intent::is_route_request(text);
        if route_intent {
            let routable = session
                .last_shown
                .iter()
                .filter(|v| v.location.is_some())
                .count();
            if routable >= 2 {
                return self.build_route(&session, text);
            }
            // Not enough mapped places to connect: run a multi-place search
            // instead, so the next route request has material to work with.
        }

        let mut context: Option<TurnContext> = None;
        let mut exclude: HashSet<String> = HashSet::new();
        if session.mode == DialogueMode::AwaitingFollowUp && intent::is_follow_up(text) {
            match intent::follow_up_kind(text) {
                FollowUpKind::Comparison => return self.compare(&session, text),
                FollowUpKind::Detail => return self.detail(&mut session, text).await,
                FollowUpKind::General => {
                    // "Something else": same need, different places.
                    context = Some(self.turn_context(&session));
                    exclude = session.shown_ids.clone();
                }
            }
        }

        // Fresh (or contextual) search. A named city overrides the snapshot
        // for this turn only; otherwise the TTL-checked location applies.
        let city = intent::extract_city(text);
        let origin = match &city {
            Some(name) => match self.aggregator.geocode_city(name, user_id).await {
                Some(location) => location,
                None => match session.valid_location(now, self.location_ttl) {
                    Some(location) => location,
                    None => return self.request_location(&mut session).await,
                },
            },
            None => match session.valid_location(now, self.location_ttl) {
                Some(location) => location,
                None => return self.request_location(&mut session).await,
            },
        };

        let multi_place = route_intent || intent::is_multi_place_request(text);
        let needed = if multi_place {
            Some(intent::requested_count(text).unwrap_or(3))
        } else {
            None
        };

        let response = match self
            .aggregator
            .search(
                text,
                origin,
                user_id,
                context.as_ref(),
                None,
                needed,
                &exclude,
            )
            .await
        {
            Ok(r) => r,
            Err(SearchFailure::QuotaExceeded { scope }) => {
                debug!(user_id, ?scope, "search blocked by quota");
                return ResponseDescriptor::text(MSG_QUOTA);
            }
            Err(SearchFailure::Upstream) => return ResponseDescriptor::text(MSG_UPSTREAM),
            Err(SearchFailure::NoResults) => return ResponseDescriptor::text(MSG_NO_RESULTS),
        };

        // The model may flag a city the utterance patterns missed. Re-center
        // on it so distances are not measured from a far-away origin.
        let origin = match &response.extracted_city {
            Some(name) if city.is_none() => self
                .aggregator
                .geocode_city(name, user_id)
                .await
                .unwrap_or(origin),
            _ => origin,
        };

        let venues = self
            .prepare_venues(response.venues, text, multi_place, origin, user_id)
            .await;
        if venues.is_empty() && response.text.is_empty() {
            return ResponseDescriptor::text(MSG_NO_RESULTS);
        }

        let page: Vec<Venue> = venues.iter().take(self.tuning.page_size).cloned().collect();
        let window = if venues.len() > page.len() {
            Some(ResultWindow {
                venues: venues[page.len()..].to_vec(),
                cursor: 0,
            })
        } else {
            None
        };
        let has_more = window.is_some();

        session.record_search(text, page.clone(), window);
        self.save_session(&session).await;

        let mut out = String::new();
        if response.quota_exceeded {
            out.push_str(MSG_FROM_CACHE_QUOTA);
        }
        if !response.text.is_empty() {
            out.push_str(response.text.trim());
            if !page.is_empty() {
                out.push_str("\n\n");
            }
        }
        out.push_str(&render_venue_list(&page));

        ResponseDescriptor::text(out).with_buttons(result_buttons(&page, has_more))
    }

    /// Opaque callback data from a previous response's buttons.
    pub async fn handle_callback(&self, user_id: &str, data: &str) -> ResponseDescriptor {
        let mut session = self.load_session(user_id).await;
        match data {
            CB_MORE => match session.next_page(self.tuning.page_size) {
                Some(page) => {
                    let has_more = session
                        .result_window
                        .as_ref()
                        .is_some_and(|w| w.cursor < w.venues.len());
                    self.save_session(&session).await;
                    ResponseDescriptor::text(render_venue_list(&page))
                        .with_buttons(result_buttons(&page, has_more))
                }
                None => ResponseDescriptor::text(MSG_NO_MORE),
            },
            CB_ROUTE if !session.last_shown.is_empty() => self.build_route(&session, ""),
            other if other.starts_with(CB_DETAIL_PREFIX) => {
                match other[CB_DETAIL_PREFIX.len()..].parse::<usize>() {
                    Ok(index) => self.detail_by_index(&mut session, index).await,
                    Err(_) => ResponseDescriptor::text(MSG_WHICH_PLACE),
                }
            }
            _ => ResponseDescriptor::text(MSG_WHICH_PLACE),
        }
    }

    async fn request_location(&self, session: &mut ConversationSession) -> ResponseDescriptor {
        session.mode = DialogueMode::AwaitingLocation;
        self.save_session(session).await;
        let mut out = ResponseDescriptor::text(MSG_NEED_LOCATION);
        out.request_location = true;
        out
    }

    fn turn_context(&self, session: &ConversationSession) -> TurnContext {
        TurnContext {
            last_query: session.last_query.clone().unwrap_or_default(),
            venues: session
                .last_shown
                .iter()
                .take(self.tuning.context_venues)
                .map(|v| (v.name.clone(), v.rating))
                .collect(),
        }
    }

    /// Enrich, filter, and rank raw candidates into presentation order.
    /// Candidates without a verified id first go through id resolution, so a
    /// grounding reference that carries only a title and URI still ends up
    /// with coordinates. Per-venue lookups run concurrently and are joined
    /// before ranking.
    async fn prepare_venues(
        &self,
        venues: Vec<Venue>,
        query: &str,
        multi_place: bool,
        origin: Location,
        user_id: &str,
    ) -> Vec<Venue> {
        let enriched = join_all(venues.into_iter().map(|venue| async move {
            let mut venue = venue;
            if !venue.has_verified_id() {
                if let Some(id) = self
                    .aggregator
                    .resolve_provider_id(
                        &venue.name,
                        venue.address.as_deref(),
                        venue.source_uri.as_deref(),
                        origin,
                        user_id,
                    )
                    .await
                {
                    venue.provider_id = Some(id);
                }
            }
            if venue.has_verified_id() && (venue.rating.is_none() || venue.location.is_none()) {
                let id = venue.provider_id.clone().unwrap_or_default();
                match self.aggregator.get_venue_details(&id, false, user_id).await {
                    Ok(VenueDetails { venue: full, .. }) => return merge_venue(venue, full),
                    Err(e) => {
                        debug!(place_id = %id, error = %e, "enrichment fetch failed");
                    }
                }
            }
            venue
        }))
        .await;

        // Bare administrative areas never qualify; lodging is dropped from
        // multi-place itineraries unless the user asked for accommodation.
        // Only mapped venues survive, since everything downstream (ranking,
        // routes, links) needs coordinates.
        let drop_lodging = multi_place && !mentions_lodging(query);
        let filtered: Vec<Venue> = enriched
            .into_iter()
            .filter(|v| !v.is_administrative_area())
            .filter(|v| !drop_lodging || !v.is_lodging())
            .filter(|v| v.location.is_some())
            .collect();

        let filters = intent::extract_filters(query).clamped();
        ranking::rank_and_filter(geo::dedupe_by_id(filtered), &filters, origin)
    }

    /// Detail follow-up: one venue from the shown list, with reviews.
    async fn detail(&self, session: &mut ConversationSession, text: &str) -> ResponseDescriptor {
        if session.last_shown.is_empty() {
            return ResponseDescriptor::text(MSG_WHICH_PLACE);
        }
        // No explicit ordinal means the most recently listed place.
        let index = intent::extract_ordinal(text).unwrap_or(session.last_shown.len());
        self.detail_by_index(session, index).await
    }

    async fn detail_by_index(
        &self,
        session: &mut ConversationSession,
        index: usize,
    ) -> ResponseDescriptor {
        let Some(venue) = index
            .checked_sub(1)
            .and_then(|i| session.last_shown.get(i))
            .cloned()
        else {
            return ResponseDescriptor::text(MSG_BAD_INDEX);
        };

        let origin = venue
            .location
            .or_else(|| session.location.map(|s| s.location));
        let place_id = match (&venue.provider_id, origin) {
            (Some(id), _) if venue.has_verified_id() => Some(id.clone()),
            (_, Some(origin)) => {
                self.aggregator
                    .resolve_provider_id(
                        &venue.name,
                        venue.address.as_deref(),
                        venue.source_uri.as_deref(),
                        origin,
                        &session.user_id,
                    )
                    .await
            }
            _ => None,
        };

        let Some(place_id) = place_id else {
            // Nothing verifiable: show what we already know, no maps link.
            return ResponseDescriptor::text(render_venue_card(&venue, &[]));
        };

        match self
            .aggregator
            .get_venue_details(&place_id, true, &session.user_id)
            .await
        {
            Ok(details) => {
                let mut shown = details.venue;
                shown.provider_id = Some(place_id);
                if shown.distance_m.is_none() {
                    shown.distance_m = venue.distance_m;
                }
                let text = render_venue_card(&shown, &details.reviews);
                let buttons = maps_url(&shown)
                    .map(|url| vec![vec![Button::url("Открыть на карте", url)]])
                    .unwrap_or_default();
                ResponseDescriptor::text(text).with_buttons(buttons)
            }
            Err(e) => {
                warn!(place_id, error = %e, "detail fetch failed");
                ResponseDescriptor::text(MSG_DETAILS_FAILED)
            }
        }
    }

    /// Comparison follow-up over two shown venues. Pure presentation, no
    /// provider calls.
    fn compare(&self, session: &ConversationSession, text: &str) -> ResponseDescriptor {
        let ordinals = intent::extract_all_ordinals(text);
        let (a, b) = match ordinals.as_slice() {
            [a, b, ..] => (*a, *b),
            _ if session.last_shown.len() >= 2 => (1, 2),
            _ => return ResponseDescriptor::text(MSG_WHICH_PLACE),
        };
        let (Some(va), Some(vb)) = (
            session.last_shown.get(a - 1),
            session.last_shown.get(b - 1),
        ) else {
            return ResponseDescriptor::text(MSG_BAD_INDEX);
        };

        let mut out = format!(
            "Сравниваю:\n\n{}. {}\n{}. {}\n\n",
            a,
            render_venue_summary(va),
            b,
            render_venue_summary(vb)
        );
        match (va.rating, vb.rating) {
            (Some(ra), Some(rb)) if ra > rb => {
                out.push_str(&format!("По рейтингу лучше «{}».", va.name))
            }
            (Some(ra), Some(rb)) if rb > ra => {
                out.push_str(&format!("По рейтингу лучше «{}».", vb.name))
            }
            _ => out.push_str("По рейтингу они примерно равны."),
        }
        match (va.distance_m, vb.distance_m) {
            (Some(da), Some(db)) if da < db => {
                out.push_str(&format!(" Ближе к вам «{}».", va.name))
            }
            (Some(da), Some(db)) if db < da => {
                out.push_str(&format!(" Ближе к вам «{}».", vb.name))
            }
            _ => {}
        }
        ResponseDescriptor::text(out)
    }

    /// Route over shown venues: explicit indices when present, the whole
    /// shown page otherwise.
    fn build_route(&self, session: &ConversationSession, text: &str) -> ResponseDescriptor {
        let mut indices = intent::extract_place_indices(text);
        if indices.is_empty() {
            indices = (1..=session.last_shown.len()).collect();
        }
        let stops: Vec<&Venue> = indices
            .iter()
            .filter_map(|&i| session.last_shown.get(i - 1))
            .collect();
        if stops.is_empty() {
            return ResponseDescriptor::text(MSG_BAD_INDEX);
        }

        let mut out = String::from("Маршрут:\n");
        for (i, venue) in stops.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, venue.name));
        }
        let buttons = directions_url(&stops)
            .map(|url| vec![vec![Button::url("Открыть маршрут", url)]])
            .unwrap_or_default();
        ResponseDescriptor::text(out).with_buttons(buttons)
    }
}

fn merge_venue(base: Venue, full: Venue) -> Venue {
    Venue {
        provider_id: base.provider_id.or(full.provider_id),
        name: base.name,
        address: base.address.or(full.address),
        rating: base.rating.or(full.rating),
        price_level: base.price_level.or(full.price_level),
        open_now: base.open_now.or(full.open_now),
        location: base.location.or(full.location),
        distance_m: base.distance_m,
        types: if base.types.is_empty() {
            full.types
        } else {
            base.types
        },
        source_uri: base.source_uri,
    }
}

fn mentions_lodging(query: &str) -> bool {
    let lower = query.to_lowercase();
    ["отел", "гостиниц", "хостел", "ночлег", "hotel", "hostel"]
        .iter()
        .any(|w| lower.contains(w))
}

fn fmt_rating(venue: &Venue) -> Option<String> {
    venue.rating.map(|r| format!("★ {:.1}", r))
}

fn fmt_price(venue: &Venue) -> Option<String> {
    venue
        .price_level
        .map(|p| "₽".repeat(usize::from(p.max(1))))
}

fn fmt_distance(venue: &Venue) -> Option<String> {
    venue.distance_m.map(|d| {
        if d < 1000.0 {
            format!("{:.0} м", d)
        } else {
            // Round to 0.1 km by hand; float formatting rounds 1.25 down.
            format!("{:.1} км", (d / 100.0).round() / 10.0)
        }
    })
}

fn render_venue_summary(venue: &Venue) -> String {
    let mut parts = vec![venue.name.clone()];
    if let Some(r) = fmt_rating(venue) {
        parts.push(r);
    }
    if let Some(p) = fmt_price(venue) {
        parts.push(p);
    }
    if let Some(d) = fmt_distance(venue) {
        parts.push(d);
    }
    if venue.open_now == Some(true) {
        parts.push("открыто".to_string());
    } else if venue.open_now == Some(false) {
        parts.push("закрыто".to_string());
    }
    parts.join(" · ")
}

fn render_venue_list(page: &[Venue]) -> String {
    page.iter()
        .enumerate()
        .map(|(i, v)| format!("{}. {}", i + 1, render_venue_summary(v)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_venue_card(venue: &Venue, reviews: &[crate::types::Review]) -> String {
    let mut out = render_venue_summary(venue);
    if let Some(address) = &venue.address {
        out.push_str(&format!("\nАдрес: {}", address));
    }
    if !reviews.is_empty() {
        out.push_str("\n\nОтзывы:");
        for review in reviews {
            out.push_str(&format!(
                "\n{} — {}",
                "★".repeat(usize::from(review.rating)),
                truncate_str(&review.text, 280)
            ));
        }
    }
    out
}

/// Maps links are built only for venues with a verified provider id;
/// unverified candidates stay plain text.
fn maps_url(venue: &Venue) -> Option<String> {
    if !venue.has_verified_id() {
        return None;
    }
    let id = venue.provider_id.as_deref()?;
    Some(format!(
        "https://www.google.com/maps/search/?api=1&query={}&query_place_id={}",
        encode_query(&venue.name),
        id
    ))
}

fn directions_url(stops: &[&Venue]) -> Option<String> {
    let (destination, waypoints) = stops.split_last()?;
    let mut url = format!(
        "https://www.google.com/maps/dir/?api=1&travelmode=walking&destination={}",
        encode_query(&destination.name)
    );
    if destination.has_verified_id() {
        if let Some(id) = destination.provider_id.as_deref() {
            url.push_str(&format!("&destination_place_id={}", id));
        }
    }
    if !waypoints.is_empty() {
        let names: Vec<String> = waypoints
            .iter()
            .map(|v| encode_query(&v.name))
            .collect();
        url.push_str(&format!("&waypoints={}", names.join("%7C")));
        if waypoints.iter().all(|v| v.has_verified_id()) {
            let ids: Vec<&str> = waypoints
                .iter()
                .filter_map(|v| v.provider_id.as_deref())
                .collect();
            url.push_str(&format!("&waypoint_place_ids={}", ids.join("%7C")));
        }
    }
    Some(url)
}

fn result_buttons(page: &[Venue], has_more: bool) -> Vec<Vec<Button>> {
    let mut rows: Vec<Vec<Button>> = Vec::new();
    let map_row: Vec<Button> = page
        .iter()
        .enumerate()
        .filter_map(|(i, v)| maps_url(v).map(|url| Button::url(&format!("{} 📍", i + 1), url)))
        .collect();
    if !map_row.is_empty() {
        rows.push(map_row);
    }
    let detail_row: Vec<Button> = page
        .iter()
        .enumerate()
        .map(|(i, _)| {
            Button::callback(
                &format!("Подробнее {}", i + 1),
                format!("{}{}", CB_DETAIL_PREFIX, i + 1),
            )
        })
        .collect();
    if !detail_row.is_empty() {
        rows.push(detail_row);
    }
    let mut controls = Vec::new();
    if has_more {
        controls.push(Button::callback("Ещё", CB_MORE.to_string()));
    }
    if page.len() >= 2 {
        controls.push(Button::callback("Маршрут", CB_ROUTE.to_string()));
    }
    if !controls.is_empty() {
        rows.push(controls);
    }
    rows
}

/// RFC 3986 percent-encoding for URL query components.
fn encode_query(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
