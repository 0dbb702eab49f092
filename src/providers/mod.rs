//! HTTP adapters for the consumed capabilities: AI grounded search (Gemini)
//! and structured place search / geocoding (Google Places).

mod error;
mod gemini;
mod google_places;

use std::time::Duration;

use reqwest::Client;

pub use error::{ProviderError, ProviderErrorKind};
pub use gemini::GeminiProvider;
pub use google_places::GooglePlacesClient;

/// Build a bounded HTTP client; every upstream call inherits this timeout so
/// one slow provider cannot stall a turn.
pub(crate) fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}
