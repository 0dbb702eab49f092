use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::providers::{build_http_client, ProviderError};
use crate::traits::{GroundedSearch, GroundedResponse, GroundingRef};
use crate::types::Location;

/// Gemini adapter: grounded generation (google_search tool) + translation.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(std::time::Duration::from_secs(
                config.request_timeout_secs,
            ))?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn generate_content(&self, body: Value) -> anyhow::Result<Value> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::Error::new(ProviderError::network(&e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| anyhow::Error::new(ProviderError::network(&e)))?;
        if !status.is_success() {
            return Err(anyhow::Error::new(ProviderError::from_status(
                status.as_u16(),
                &text,
            )));
        }
        let value: Value = serde_json::from_str(&text)?;
        Ok(value)
    }
}

/// Concatenate all text parts of the first candidate.
fn extract_text(response: &Value) -> String {
    let Some(parts) = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

/// Walk groundingMetadata chunks into refs. Both web chunks (uri/title) and
/// maps chunks (which can carry a direct placeId) are supported.
fn extract_grounding_refs(response: &Value) -> Vec<GroundingRef> {
    let Some(chunks) = response
        .pointer("/candidates/0/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut refs = Vec::new();
    for chunk in chunks {
        let source = chunk.get("maps").or_else(|| chunk.get("web"));
        let Some(source) = source else { continue };
        let title = source
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let uri = source
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string);
        let place_id = source
            .get("placeId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if title.is_none() && uri.is_none() && place_id.is_none() {
            continue;
        }
        refs.push(GroundingRef {
            title,
            uri,
            place_id,
        });
    }
    refs
}

#[async_trait]
impl GroundedSearch for GeminiProvider {
    async fn generate(
        &self,
        prompt: &str,
        location_bias: Option<Location>,
    ) -> anyhow::Result<GroundedResponse> {
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "tools": [{ "google_search": {} }],
        });
        if let Some(loc) = location_bias {
            body["systemInstruction"] = json!({
                "parts": [{
                    "text": format!("The user is at latitude {:.6}, longitude {:.6}. \
                         Prefer places near that point.", loc.lat, loc.lon),
                }],
            });
        }

        let response = self.generate_content(body).await?;
        let text = extract_text(&response);
        let refs = extract_grounding_refs(&response);
        debug!(refs = refs.len(), "grounded generation returned");
        if text.is_empty() && refs.is_empty() {
            warn!("grounded generation returned no text and no references");
        }
        Ok(GroundedResponse { text, refs })
    }

    async fn translate(&self, text: &str, target_lang: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "Translate the following review into {}. Reply with the translation only, \
             no commentary:\n\n{}",
            target_lang, text
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        });
        let response = self.generate_content(body).await?;
        let translated = extract_text(&response);
        if translated.trim().is_empty() {
            anyhow::bail!("empty translation response");
        }
        Ok(translated.trim().to_string())
    }
}
