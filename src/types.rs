use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used for ids we mint internally when an upstream reference carried
/// no usable place id. Such ids must never reach navigation features.
pub const INTERNAL_ID_PREFIX: &str = "internal-";

/// A WGS84 coordinate pair, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A candidate place result.
///
/// `provider_id` may be absent, or present but unverified (extracted from a
/// grounding URI, or internally minted). Use [`Venue::has_verified_id`] before
/// building any navigation affordance from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// 0.0..=5.0 when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    /// 0..=4 when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_now: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Meters from the search origin, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Provider place types (e.g. "cafe", "locality", "lodging").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// URI of the grounding reference this venue came from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Venue {
    pub fn named(name: &str) -> Self {
        Self {
            provider_id: None,
            name: name.to_string(),
            address: None,
            rating: None,
            price_level: None,
            open_now: None,
            location: None,
            distance_m: None,
            types: Vec::new(),
            source_uri: None,
        }
    }

    /// True when the venue carries a provider id that passes format validation.
    pub fn has_verified_id(&self) -> bool {
        self.provider_id.as_deref().is_some_and(is_valid_provider_id)
    }

    /// True for results that are bare administrative areas (a city or region
    /// row with no concrete venue subtype). These never enter a response set.
    pub fn is_administrative_area(&self) -> bool {
        if self.types.is_empty() {
            return false;
        }
        let admin = ["locality", "political", "country", "sublocality"];
        self.types
            .iter()
            .all(|t| admin.contains(&t.as_str()) || t.starts_with("administrative_area"))
    }

    pub fn is_lodging(&self) -> bool {
        self.types.iter().any(|t| t == "lodging")
    }
}

/// Validate an opaque provider place id: long enough to be real, restricted
/// charset, and not one of our own placeholders.
pub fn is_valid_provider_id(id: &str) -> bool {
    id.len() >= 20
        && !id.starts_with(INTERNAL_ID_PREFIX)
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A single place review, used for sentiment selection in detail responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub rating: u8,
    pub text: String,
}

/// A venue plus its (possibly translated) selected reviews.
#[derive(Debug, Clone)]
pub struct VenueDetails {
    pub venue: Venue,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Rating,
    Price,
    Distance,
}

/// User-stated result constraints, parsed from the utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_level: Option<u8>,
    #[serde(default)]
    pub open_now: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
}

impl SearchFilters {
    /// Bound stated thresholds to their legal ranges.
    pub fn clamped(mut self) -> Self {
        if let Some(r) = self.min_rating {
            self.min_rating = Some(r.clamp(1.0, 5.0));
        }
        if let Some(p) = self.max_price_level {
            self.max_price_level = Some(p.min(4));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A user's location snapshot. Replaced, never merged, on each share.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub location: Location,
    pub captured_at: DateTime<Utc>,
}

/// One button in the outbound response grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    /// Open an external link (e.g. a maps link) in the client.
    Url(String),
    /// Opaque callback data routed back to the orchestrator.
    Callback(String),
}

impl Button {
    pub fn url(label: &str, url: String) -> Self {
        Self {
            label: label.to_string(),
            action: ButtonAction::Url(url),
        }
    }

    pub fn callback(label: &str, data: String) -> Self {
        Self {
            label: label.to_string(),
            action: ButtonAction::Callback(data),
        }
    }
}

/// What the orchestrator hands to the transport layer. Delivery (and native
/// UI like location-share prompts) is the transport's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
    /// Hint: the client should offer its native location-share control.
    #[serde(default)]
    pub request_location: bool,
}

impl ResponseDescriptor {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
            request_location: false,
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }
}
