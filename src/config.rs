use serde::Deserialize;
use std::path::Path;

/// Top-level configuration. Constructed once (from TOML or by hand in tests)
/// and passed into every component at construction time; there is no global
/// configuration holder.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub places: PlacesConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub search: SearchTuning,
}

/// AI grounded-search provider (Gemini).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Target language for translated review snippets.
    #[serde(default = "default_display_language")]
    pub display_language: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_ai_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            display_language: default_display_language(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_ai_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_display_language() -> String {
    "ru".to_string()
}

/// Structured place search / geocoding provider (Google Places).
#[derive(Debug, Deserialize, Clone)]
pub struct PlacesConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_places_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_places_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_places_base_url() -> String {
    "https://maps.googleapis.com/maps/api".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "placefinder.db".to_string()
}

/// Daily call budgets, per provider. Advisory, fail-open (see `quota`).
#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_ai_limits")]
    pub ai: ProviderLimits,
    #[serde(default = "default_places_limits")]
    pub places: ProviderLimits,
    #[serde(default = "default_geocoding_limits")]
    pub geocoding: ProviderLimits,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            ai: default_ai_limits(),
            places: default_places_limits(),
            geocoding: default_geocoding_limits(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ProviderLimits {
    pub user_daily: i64,
    pub global_daily: i64,
}

fn default_ai_limits() -> ProviderLimits {
    ProviderLimits {
        user_daily: 50,
        global_daily: 1000,
    }
}
fn default_places_limits() -> ProviderLimits {
    ProviderLimits {
        user_daily: 100,
        global_daily: 2500,
    }
}
fn default_geocoding_limits() -> ProviderLimits {
    ProviderLimits {
        user_daily: 20,
        global_daily: 500,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_details_ttl_secs")]
    pub details_ttl_secs: u64,
    /// Geocode entries never expire when unset (cities don't move).
    #[serde(default)]
    pub geocode_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: default_search_ttl_secs(),
            details_ttl_secs: default_details_ttl_secs(),
            geocode_ttl_secs: None,
        }
    }
}

fn default_search_ttl_secs() -> u64 {
    4 * 3600
}
fn default_details_ttl_secs() -> u64 {
    24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// How long a shared location stays valid.
    #[serde(default = "default_location_ttl_minutes")]
    pub location_ttl_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            location_ttl_minutes: default_location_ttl_minutes(),
        }
    }
}

fn default_location_ttl_minutes() -> u64 {
    30
}

/// Knobs for the aggregator's fallback radius ladder and paging.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchTuning {
    #[serde(default = "default_base_radius_m")]
    pub base_radius_m: u32,
    /// Escalation radii tried after the base nearby search comes up short.
    #[serde(default = "default_radius_ladder_m")]
    pub radius_ladder_m: Vec<u32>,
    /// Results are re-filtered to this radius after each escalation step.
    #[serde(default = "default_max_radius_m")]
    pub max_radius_m: u32,
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    /// Hard cap on venues per response page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Prior venues carried into the grounding prompt as context.
    #[serde(default = "default_context_venues")]
    pub context_venues: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            base_radius_m: default_base_radius_m(),
            radius_ladder_m: default_radius_ladder_m(),
            max_radius_m: default_max_radius_m(),
            min_results: default_min_results(),
            page_size: default_page_size(),
            context_venues: default_context_venues(),
        }
    }
}

fn default_base_radius_m() -> u32 {
    1000
}
fn default_radius_ladder_m() -> Vec<u32> {
    vec![2000, 5000, 10000]
}
fn default_max_radius_m() -> u32 {
    10000
}
fn default_min_results() -> usize {
    3
}
fn default_page_size() -> usize {
    5
}
fn default_context_venues() -> usize {
    3
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
