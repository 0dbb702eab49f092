//! Per-user conversation session: location snapshot, dialogue mode, last
//! shown results, shown-place history, and the pagination window.
//!
//! The session is the authority for whether an utterance is a fresh search,
//! a follow-up, or a route request. Location validity is re-evaluated on
//! every read against a TTL; it is never cached as a boolean.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Location, LocationSnapshot, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    /// Brand-new session or expired/cleared location.
    AwaitingLocation,
    /// Valid location on file, no referenceable results yet.
    Fresh,
    /// A search just completed; results are available for follow-ups.
    AwaitingFollowUp,
}

/// Results beyond the first page, kept for "show more" without re-querying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultWindow {
    pub venues: Vec<Venue>,
    pub cursor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationSnapshot>,
    pub mode: DialogueMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_query: Option<String>,
    /// Most recent result page, in shown order. Replaced on every successful
    /// search turn.
    #[serde(default)]
    pub last_shown: Vec<Venue>,
    /// Ids shown within the current location-validity window. Append-only
    /// until the next location share.
    #[serde(default)]
    pub shown_ids: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_window: Option<ResultWindow>,
}

impl ConversationSession {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            location: None,
            mode: DialogueMode::AwaitingLocation,
            last_query: None,
            last_shown: Vec::new(),
            shown_ids: HashSet::new(),
            result_window: None,
        }
    }

    /// The stored location, if it is still inside the TTL window.
    pub fn valid_location(&self, now: DateTime<Utc>, ttl: Duration) -> Option<Location> {
        let snapshot = self.location?;
        if now - snapshot.captured_at <= ttl {
            Some(snapshot.location)
        } else {
            None
        }
    }

    /// Replace the location snapshot. A new location restarts "already seen"
    /// tracking and pagination, and re-opens the fresh-search path.
    pub fn record_location(&mut self, location: Location, now: DateTime<Utc>) {
        self.location = Some(LocationSnapshot {
            location,
            captured_at: now,
        });
        self.shown_ids.clear();
        self.result_window = None;
        self.mode = DialogueMode::Fresh;
    }

    /// Record a successful search turn: atomically replace the shown page,
    /// extend the shown-id history, and move to follow-up mode.
    pub fn record_search(&mut self, query: &str, page: Vec<Venue>, window: Option<ResultWindow>) {
        for venue in &page {
            if let Some(id) = &venue.provider_id {
                self.shown_ids.insert(id.clone());
            }
        }
        self.last_query = Some(query.to_string());
        self.last_shown = page;
        self.result_window = window;
        self.mode = DialogueMode::AwaitingFollowUp;
    }

    /// Advance the pagination window by one page. Shown-id history grows;
    /// nothing is re-queried.
    pub fn next_page(&mut self, page_size: usize) -> Option<Vec<Venue>> {
        let window = self.result_window.as_mut()?;
        if window.cursor >= window.venues.len() {
            return None;
        }
        let end = (window.cursor + page_size).min(window.venues.len());
        let page: Vec<Venue> = window.venues[window.cursor..end].to_vec();
        window.cursor = end;
        for venue in &page {
            if let Some(id) = &venue.provider_id {
                self.shown_ids.insert(id.clone());
            }
        }
        self.last_shown = page.clone();
        Some(page)
    }

    /// Explicit reset; the only way a session loses its history.
    pub fn reset(&mut self) {
        *self = Self::new(&self.user_id);
    }
}
