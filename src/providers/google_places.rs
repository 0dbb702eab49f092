use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::PlacesConfig;
use crate::providers::{build_http_client, ProviderError};
use crate::traits::{GeocodeResult, PlacesClient};
use crate::types::{Location, Review, Venue, VenueDetails};

const DETAIL_FIELDS: &str =
    "place_id,name,formatted_address,rating,price_level,opening_hours,geometry,types";

/// Google Places / Geocoding adapter.
///
/// Provider statuses are mapped, not thrown blindly: "OK" yields results,
/// "ZERO_RESULTS" yields an empty vector, everything else becomes a
/// classified [`ProviderError`] the aggregator can recover from.
pub struct GooglePlacesClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GooglePlacesClient {
    pub fn new(config: &PlacesConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(std::time::Duration::from_secs(
                config.request_timeout_secs,
            ))?,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> anyhow::Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("key", self.api_key.clone()));

        let resp = self
            .client
            .get(&url)
            .query(&query)
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
        Ok(serde_json::from_str(&text)?)
    }

    /// Check the in-body provider status; Ok(true) means results are present,
    /// Ok(false) means a clean zero-results response.
    fn check_status(body: &Value) -> anyhow::Result<bool> {
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN_ERROR");
        match status {
            "OK" => Ok(true),
            "ZERO_RESULTS" => Ok(false),
            other => Err(anyhow::Error::new(ProviderError::from_provider_status(
                other,
                body.get("error_message").and_then(Value::as_str),
            ))),
        }
    }
}

pub(crate) fn venue_from_result(result: &Value) -> Option<Venue> {
    let name = result.get("name").and_then(Value::as_str)?;
    let mut venue = Venue::named(name);
    venue.provider_id = result
        .get("place_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    venue.address = result
        .get("vicinity")
        .or_else(|| result.get("formatted_address"))
        .and_then(Value::as_str)
        .map(str::to_string);
    venue.rating = result.get("rating").and_then(Value::as_f64);
    venue.price_level = result
        .get("price_level")
        .and_then(Value::as_u64)
        .map(|p| p.min(4) as u8);
    venue.open_now = result
        .pointer("/opening_hours/open_now")
        .and_then(Value::as_bool);
    if let (Some(lat), Some(lon)) = (
        result.pointer("/geometry/location/lat").and_then(Value::as_f64),
        result.pointer("/geometry/location/lng").and_then(Value::as_f64),
    ) {
        venue.location = Some(Location::new(lat, lon));
    }
    venue.types = result
        .get("types")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(venue)
}

fn venues_from_body(body: &Value) -> Vec<Venue> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().filter_map(venue_from_result).collect())
        .unwrap_or_default()
}

#[async_trait]
impl PlacesClient for GooglePlacesClient {
    async fn nearby(
        &self,
        location: Location,
        radius_m: u32,
        keyword: &str,
    ) -> anyhow::Result<Vec<Venue>> {
        let body = self
            .get_json(
                "place/nearbysearch/json",
                &[
                    ("location", format!("{},{}", location.lat, location.lon)),
                    ("radius", radius_m.to_string()),
                    ("keyword", keyword.to_string()),
                ],
            )
            .await?;
        if !Self::check_status(&body)? {
            return Ok(Vec::new());
        }
        Ok(venues_from_body(&body))
    }

    async fn text_search(
        &self,
        query: &str,
        location: Location,
        radius_m: u32,
    ) -> anyhow::Result<Vec<Venue>> {
        let body = self
            .get_json(
                "place/textsearch/json",
                &[
                    ("query", query.to_string()),
                    ("location", format!("{},{}", location.lat, location.lon)),
                    ("radius", radius_m.to_string()),
                ],
            )
            .await?;
        if !Self::check_status(&body)? {
            return Ok(Vec::new());
        }
        Ok(venues_from_body(&body))
    }

    async fn details(
        &self,
        place_id: &str,
        include_reviews: bool,
    ) -> anyhow::Result<VenueDetails> {
        let fields = if include_reviews {
            format!("{},reviews", DETAIL_FIELDS)
        } else {
            DETAIL_FIELDS.to_string()
        };
        let body = self
            .get_json(
                "place/details/json",
                &[
                    ("place_id", place_id.to_string()),
                    ("fields", fields),
                ],
            )
            .await?;
        if !Self::check_status(&body)? {
            anyhow::bail!("place details returned no result for {}", place_id);
        }
        let result = body
            .get("result")
            .ok_or_else(|| anyhow::anyhow!("place details response missing result"))?;
        let venue = venue_from_result(result)
            .ok_or_else(|| anyhow::anyhow!("place details result missing name"))?;
        let reviews = result
            .get("reviews")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        let rating = r.get("rating").and_then(Value::as_u64)? as u8;
                        let text = r.get("text").and_then(Value::as_str)?;
                        Some(Review {
                            rating,
                            text: text.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(VenueDetails { venue, reviews })
    }

    async fn geocode(&self, address: &str) -> anyhow::Result<Vec<GeocodeResult>> {
        let body = self
            .get_json("geocode/json", &[("address", address.to_string())])
            .await?;
        if !Self::check_status(&body)? {
            return Ok(Vec::new());
        }
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(results
            .iter()
            .filter_map(|r| {
                let lat = r.pointer("/geometry/location/lat").and_then(Value::as_f64)?;
                let lon = r.pointer("/geometry/location/lng").and_then(Value::as_f64)?;
                Some(GeocodeResult {
                    location: Location::new(lat, lon),
                    formatted_address: r
                        .get("formatted_address")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    types: r
                        .get("types")
                        .and_then(Value::as_array)
                        .map(|arr| {
                            arr.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            })
            .collect())
    }
}
