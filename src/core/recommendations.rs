//! AI recommendations enriched with Google Places data.
//!
//! A kind (food, activities, nightlife, ...) describes which model to ask,
//! how to phrase the prompt and under which JSON keys the answer may come
//! back. Items are then matched against Places for a real address, a photo
//! and the driving time from the property.

use crate::domain::model::{PlaceCandidate, RecommendationItem};
use crate::domain::ports::{CompletionClient, PlacesClient};
use crate::utils::error::{AppError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub const MIN_ITEMS: u32 = 1;
pub const MAX_ITEMS: u32 = 20;
pub const DEFAULT_ITEMS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationKind {
    pub model: String,
    pub system_prompt: String,
    /// 可用的替換欄位：`{address}`、`{num_items}`、`{response_key}`
    pub user_prompt_template: String,
    pub response_keys: Vec<String>,
    pub default_response_key: String,
}

impl RecommendationKind {
    pub fn user_prompt(&self, address: &str, num_items: u32) -> String {
        self.user_prompt_template
            .replace("{address}", address)
            .replace("{num_items}", &num_items.to_string())
            .replace("{response_key}", &self.default_response_key)
    }

    /// 回應可能是陣列，或是物件中第一個可接受且值為陣列的 key
    pub fn extract_items(&self, response: &Value) -> Vec<Value> {
        match response {
            Value::Array(items) => items.clone(),
            Value::Object(obj) => self
                .response_keys
                .iter()
                .find_map(|key| obj.get(key).and_then(Value::as_array))
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

fn kind(
    model: &str,
    system_prompt: &str,
    subject: &str,
    response_keys: &[&str],
    default_response_key: &str,
) -> RecommendationKind {
    RecommendationKind {
        model: model.to_string(),
        system_prompt: system_prompt.to_string(),
        user_prompt_template: format!(
            "Provide a JSON object with a key '{{response_key}}' containing a list of {{num_items}} {} near {{address}}. \
             Each item must have 'name', 'address', and a brief 'description'. \
             The 'address' should be the real-world street address, as specific as possible (street, city, zip). \
             The list should contain exactly {{num_items}} items. \
             Do NOT include any image URLs or keys for images.",
            subject
        ),
        response_keys: response_keys.iter().map(|k| k.to_string()).collect(),
        default_response_key: default_response_key.to_string(),
    }
}

/// 可在執行期新增種類的推薦目錄
pub struct RecommendationCatalog {
    kinds: RwLock<BTreeMap<String, RecommendationKind>>,
}

impl Default for RecommendationCatalog {
    fn default() -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(
            "food".to_string(),
            kind(
                "gpt-4-1106-preview",
                "You are a helpful assistant that provides diverse, highly-rated restaurant and food recommendations.",
                "diverse, highly-rated restaurants or food spots",
                &["restaurants", "places_to_eat", "food"],
                "places_to_eat",
            ),
        );
        kinds.insert(
            "activities".to_string(),
            kind(
                "gpt-4o",
                "You are a helpful assistant that provides local activities and things to do in a strict JSON format.",
                "local activities and things to do for guests of a vacation rental",
                &["activities", "things_to_do", "activityItems"],
                "activities",
            ),
        );
        kinds.insert(
            "nightlife".to_string(),
            kind(
                "gpt-4o",
                "You are a helpful assistant that provides nightlife and entertainment recommendations.",
                "popular nightlife spots, bars, clubs, or entertainment venues",
                &["nightlife", "entertainment", "bars", "venues"],
                "nightlife",
            ),
        );
        Self {
            kinds: RwLock::new(kinds),
        }
    }
}

impl RecommendationCatalog {
    pub fn register(&self, name: impl Into<String>, kind: RecommendationKind) {
        let name = name.into();
        tracing::info!("➕ Registered recommendation kind: {}", name);
        self.kinds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, kind);
    }

    pub fn get(&self, name: &str) -> Option<RecommendationKind> {
        self.kinds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.kinds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

pub fn clamp_items(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_ITEMS).clamp(MIN_ITEMS, MAX_ITEMS)
}

pub fn photo_proxy_path(photo_reference: &str, max_width: u32) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(photo_reference.as_bytes()).collect();
    format!("/api/place-photo?photo_reference={}&maxwidth={}", encoded, max_width)
}

pub struct RecommendationEngine {
    completion: Option<Arc<dyn CompletionClient>>,
    places: Option<Arc<dyn PlacesClient>>,
    catalog: RecommendationCatalog,
}

impl RecommendationEngine {
    pub fn new(
        completion: Option<Arc<dyn CompletionClient>>,
        places: Option<Arc<dyn PlacesClient>>,
    ) -> Self {
        Self {
            completion,
            places,
            catalog: RecommendationCatalog::default(),
        }
    }

    pub fn catalog(&self) -> &RecommendationCatalog {
        &self.catalog
    }

    pub fn places(&self) -> Option<&Arc<dyn PlacesClient>> {
        self.places.as_ref()
    }

    /// 取得推薦清單；上游失敗時記錄警告並回傳空清單，只有未知種類會回傳錯誤
    pub async fn recommend(
        &self,
        kind_name: &str,
        address: &str,
        num_items: u32,
    ) -> Result<Vec<RecommendationItem>> {
        let kind = self.catalog.get(kind_name).ok_or_else(|| {
            AppError::validation(format!(
                "Unknown recommendation type: {}. Available types: {}",
                kind_name,
                self.catalog.names().join(", ")
            ))
        })?;
        let address = address.trim();
        if address.is_empty() {
            return Err(AppError::validation("address is required"));
        }
        let num_items = num_items.clamp(MIN_ITEMS, MAX_ITEMS);

        let Some(completion) = &self.completion else {
            tracing::warn!("⚠️ OpenAI is not configured, no {} recommendations", kind_name);
            return Ok(Vec::new());
        };

        let prompt = kind.user_prompt(address, num_items);
        let response = match completion
            .complete_json(&kind.model, &kind.system_prompt, &prompt)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("⚠️ {} recommendations failed: {}", kind_name, e);
                return Ok(Vec::new());
            }
        };

        let raw = kind.extract_items(&response);
        if raw.is_empty() {
            tracing::warn!("⚠️ No items found in completion response for {}", kind_name);
            return Ok(Vec::new());
        }

        let items: Vec<RecommendationItem> = raw
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<RecommendationItem>(v.clone()) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping malformed {} item {}: {}", kind_name, v, e);
                    None
                }
            })
            .collect();
        let enriched = self.enrich(items, address).await;
        tracing::info!("✅ {} {} recommendations for {}", enriched.len(), kind_name, address);
        Ok(enriched)
    }

    async fn enrich(&self, items: Vec<RecommendationItem>, origin: &str) -> Vec<RecommendationItem> {
        let mut enriched = Vec::with_capacity(items.len());

        for item in items {
            if item.name.trim().is_empty() || item.address.trim().is_empty() {
                tracing::warn!("⚠️ Skipping item with missing name or address: {:?}", item.name);
                continue;
            }
            let Some(places) = &self.places else {
                enriched.push(item);
                continue;
            };

            match self.enrich_one(places.as_ref(), item, origin).await {
                Ok(Some(item)) => enriched.push(item),
                Ok(None) => {}
                Err(e) => tracing::warn!("⚠️ Places enrichment failed: {}", e),
            }
        }

        enriched
    }

    async fn enrich_one(
        &self,
        places: &dyn PlacesClient,
        item: RecommendationItem,
        origin: &str,
    ) -> Result<Option<RecommendationItem>> {
        let query = format!("{}, {}", item.name, item.address);
        let candidates = places.text_search(&query, Some(origin)).await?;
        let Some(place) = candidates.into_iter().next() else {
            tracing::warn!("⚠️ No Places results for {}, skipping", item.name);
            return Ok(None);
        };
        if place.place_id.is_empty() {
            tracing::warn!("⚠️ No place_id for {}, skipping", item.name);
            return Ok(None);
        }

        let details = places.details(&place.place_id).await?;
        let address = details
            .as_ref()
            .and_then(|d| d.formatted_address.clone())
            .or_else(|| place.address.clone())
            .unwrap_or_else(|| item.address.clone());
        let photo_reference = details
            .as_ref()
            .and_then(|d| d.photo_reference.clone())
            .or(place.photo_reference);

        let driving_minutes = match places.driving_minutes(origin, &address).await {
            Ok(minutes) => minutes,
            Err(e) => {
                tracing::debug!("Distance lookup failed for {}: {}", item.name, e);
                None
            }
        };

        Ok(Some(RecommendationItem {
            address,
            photo_reference,
            driving_minutes,
            ..item
        }))
    }

    pub async fn search_places(&self, query: &str, near: Option<&str>) -> Result<Vec<PlaceCandidate>> {
        let places = self.require_places()?;
        let query = match near.map(str::trim).filter(|n| !n.is_empty()) {
            Some(near) => format!("{} near {}", query.trim(), near),
            None => query.trim().to_string(),
        };
        places.text_search(&query, None).await
    }

    /// 單一地點轉成推薦項目，圖片指向 photo proxy
    pub async fn enrich_place(&self, place_id: &str) -> Result<RecommendationItem> {
        let places = self.require_places()?;
        let details = places
            .details(place_id)
            .await?
            .ok_or_else(|| AppError::not_found("Place", place_id))?;

        Ok(RecommendationItem {
            name: details.name.unwrap_or_default(),
            description: String::new(),
            address: details.formatted_address.unwrap_or_default(),
            image_url: details
                .photo_reference
                .as_deref()
                .map(|reference| photo_proxy_path(reference, 800)),
            photo_reference: details.photo_reference,
            driving_minutes: None,
        })
    }

    fn require_places(&self) -> Result<&Arc<dyn PlacesClient>> {
        self.places.as_ref().ok_or_else(|| AppError::MissingConfigError {
            field: "google.api_key".to_string(),
        })
    }
}
