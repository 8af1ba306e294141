//! AI recommendation and Google Places helper endpoints.

use crate::api::auth::AuthUser;
use crate::api::state::SharedState;
use crate::core::recommendations::clamp_items;
use crate::domain::model::{PlaceCandidate, RecommendationItem};
use crate::utils::error::{AppError, Result};
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

const DEFAULT_PHOTO_WIDTH: u32 = 400;
const MAX_PHOTO_WIDTH: u32 = 1600;

#[derive(Debug, Deserialize)]
pub struct FoodBody {
    pub address: String,
    pub num_places_to_eat: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ActivitiesBody {
    pub address: String,
    pub num_things_to_do: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct KindBody {
    pub address: String,
    pub num_items: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct Activities {
    pub activities: Vec<RecommendationItem>,
}

pub async fn ai_food(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(body): Json<FoodBody>,
) -> Result<Json<Vec<RecommendationItem>>> {
    let items = state
        .recommendations
        .recommend("food", &body.address, clamp_items(body.num_places_to_eat))
        .await?;
    Ok(Json(items))
}

pub async fn ai_activities(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(body): Json<ActivitiesBody>,
) -> Result<Json<Activities>> {
    let activities = state
        .recommendations
        .recommend("activities", &body.address, clamp_items(body.num_things_to_do))
        .await?;
    Ok(Json(Activities { activities }))
}

pub async fn ai_kind(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(kind): Path<String>,
    Json(body): Json<KindBody>,
) -> Result<Json<Items<RecommendationItem>>> {
    let items = state
        .recommendations
        .recommend(&kind, &body.address, clamp_items(body.num_items))
        .await?;
    Ok(Json(Items { items }))
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    pub near: Option<String>,
}

pub async fn places_search(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(body): Json<SearchBody>,
) -> Result<Json<Items<PlaceCandidate>>> {
    if body.query.trim().is_empty() {
        return Err(AppError::validation("query is required"));
    }
    let items = state
        .recommendations
        .search_places(&body.query, body.near.as_deref())
        .await?;
    Ok(Json(Items { items }))
}

#[derive(Debug, Deserialize)]
pub struct EnrichQuery {
    pub place_id: Option<String>,
}

pub async fn places_enrich(
    State(state): State<SharedState>,
    _user: AuthUser,
    Query(query): Query<EnrichQuery>,
) -> Result<Json<RecommendationItem>> {
    let place_id = query
        .place_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("place_id is required"))?;
    Ok(Json(state.recommendations.enrich_place(place_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PhotoQuery {
    pub photo_reference: Option<String>,
    pub maxwidth: Option<u32>,
}

/// 代理 Google 照片，API key 不會送到瀏覽器
pub async fn place_photo(
    State(state): State<SharedState>,
    Query(query): Query<PhotoQuery>,
) -> Result<Response> {
    let reference = query
        .photo_reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::validation("photo_reference is required"))?;
    let width = query
        .maxwidth
        .unwrap_or(DEFAULT_PHOTO_WIDTH)
        .clamp(1, MAX_PHOTO_WIDTH);

    let places = state
        .recommendations
        .places()
        .ok_or_else(|| AppError::MissingConfigError {
            field: "google".to_string(),
        })?;
    let photo = places.photo(reference, width).await?;

    let mut response = (StatusCode::OK, photo.bytes).into_response();
    let headers = response.headers_mut();
    let content_type = HeaderValue::from_str(&photo.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("image/jpeg"));
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
    Ok(response)
}
