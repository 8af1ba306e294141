use crate::api::state::SharedState;
use crate::core::guidebooks::PublicPage;
use crate::utils::error::Result;
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde_json::json;

pub async fn guidebook_page(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Response> {
    Ok(match state.guidebooks.public_page(&id)? {
        PublicPage::Html(html) => Html(html).into_response(),
        PublicPage::Redirect(target) => Redirect::to(&target).into_response(),
    })
}

pub async fn slug_page(State(state): State<SharedState>, Path(slug): Path<String>) -> Result<Html<String>> {
    Ok(Html(state.guidebooks.page_by_slug(&slug)?))
}

pub async fn preview_page(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Html<String>> {
    Ok(Html(state.guidebooks.preview(&id)?))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
