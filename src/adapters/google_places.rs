use crate::domain::model::{PhotoBytes, PlaceCandidate, PlaceDetails};
use crate::domain::ports::PlacesClient;
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const DETAILS_FIELDS: &str = "name,formatted_address,photos,website,rating,geometry,types";

/// Google Places Web Service (text search, details, photo) 與 Distance Matrix
pub struct GooglePlacesClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Photo {
    photo_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextSearchResult {
    place_id: Option<String>,
    name: Option<String>,
    formatted_address: Option<String>,
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    results: Vec<TextSearchResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    name: Option<String>,
    formatted_address: Option<String>,
    #[serde(default)]
    photos: Vec<Photo>,
    website: Option<String>,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    result: Option<DetailsResult>,
}

impl GooglePlacesClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("📍 Google response status: {}", status);

        if !status.is_success() {
            return Err(AppError::UpstreamError {
                service: "google".to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

fn first_photo(photos: &[Photo]) -> Option<String> {
    photos.first().and_then(|p| p.photo_reference.clone())
}

#[async_trait]
impl PlacesClient for GooglePlacesClient {
    async fn text_search(&self, query: &str, location: Option<&str>) -> Result<Vec<PlaceCandidate>> {
        let mut request = self
            .get("/maps/api/place/textsearch/json")
            .query(&[("query", query)]);
        if let Some(location) = location {
            request = request.query(&[("location", location)]);
        }

        let body = self.send_json(request).await?;
        let parsed: TextSearchResponse = serde_json::from_value(body)?;

        Ok(parsed
            .results
            .into_iter()
            .filter_map(|r| {
                let place_id = r.place_id?;
                Some(PlaceCandidate {
                    place_id,
                    name: r.name.unwrap_or_default(),
                    photo_reference: first_photo(&r.photos),
                    address: r.formatted_address,
                })
            })
            .collect())
    }

    async fn details(&self, place_id: &str) -> Result<Option<PlaceDetails>> {
        let request = self
            .get("/maps/api/place/details/json")
            .query(&[("place_id", place_id), ("fields", DETAILS_FIELDS)]);

        let body = self.send_json(request).await?;
        let parsed: DetailsResponse = serde_json::from_value(body)?;

        Ok(parsed.result.map(|r| PlaceDetails {
            place_id: place_id.to_string(),
            photo_reference: first_photo(&r.photos),
            name: r.name,
            formatted_address: r.formatted_address,
            website: r.website,
            rating: r.rating,
        }))
    }

    async fn driving_minutes(&self, origin: &str, destination: &str) -> Result<Option<u32>> {
        let request = self.get("/maps/api/distancematrix/json").query(&[
            ("origins", origin),
            ("destinations", destination),
            ("mode", "driving"),
        ]);

        let body = self.send_json(request).await?;
        let seconds = body
            .pointer("/rows/0/elements/0/duration/value")
            .and_then(Value::as_f64);

        Ok(seconds.map(|s| (s / 60.0).round() as u32))
    }

    async fn photo(&self, photo_reference: &str, max_width: u32) -> Result<PhotoBytes> {
        let response = self
            .get("/maps/api/place/photo")
            .query(&[("photoreference", photo_reference)])
            .query(&[("maxwidth", max_width)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamError {
                service: "google".to_string(),
                status: status.as_u16(),
                message: format!("Photo request failed for {}", photo_reference),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(PhotoBytes {
            content_type,
            bytes,
        })
    }
}
