//! Owner-facing guidebook endpoints.

use crate::api::auth::AuthUser;
use crate::api::state::SharedState;
use crate::core::guidebooks::{CreatedGuidebook, GuidebookList, PdfOptions, Published};
use crate::domain::model::{ActivationReport, Guidebook, GuidebookPayload, GuidebookRecord, PlanUsage};
use crate::utils::error::Result;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

const GUIDEBOOK_URL: &str = "x-guidebook-url";
const GUIDEBOOK_PREVIEW: &str = "x-guidebook-preview";

pub async fn generate(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(payload): Json<GuidebookPayload>,
) -> Result<Response> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    let created: CreatedGuidebook = state.guidebooks.create(&user.user_id, payload)?;

    let mut response = (StatusCode::CREATED, Json(&created)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("/guidebook/{}", created.guidebook_id)) {
        headers.insert(GUIDEBOOK_URL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("/preview/{}", created.guidebook_id)) {
        headers.insert(GUIDEBOOK_PREVIEW, value);
    }
    Ok(response)
}

pub async fn list(State(state): State<SharedState>, user: AuthUser) -> Result<Json<GuidebookList>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.guidebooks.list(&user.user_id)?))
}

pub async fn get_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<GuidebookRecord>> {
    Ok(Json(state.guidebooks.get(&user.user_id, &id)?))
}

pub async fn update(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<GuidebookPayload>,
) -> Result<Json<Guidebook>> {
    Ok(Json(state.guidebooks.update(&user.user_id, &id, payload)?))
}

pub async fn delete(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.guidebooks.delete(&user.user_id, &id)?;
    Ok(Json(json!({ "ok": true, "guidebook_id": id })))
}

pub async fn publish(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Published>> {
    Ok(Json(state.guidebooks.publish(&user.user_id, &id)?))
}

pub async fn activate(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Guidebook>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.slots.activate(&user.user_id, &id)?))
}

pub async fn deactivate(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Guidebook>> {
    Ok(Json(state.slots.deactivate(&user.user_id, &id)?))
}

pub async fn activate_for_user(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<ActivationReport>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.slots.reconcile(&user.user_id)?))
}

#[derive(Debug, Deserialize)]
pub struct TemplateBody {
    pub template_key: String,
}

pub async fn set_template(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<TemplateBody>,
) -> Result<Json<serde_json::Value>> {
    state.guidebooks.set_template(&user.user_id, &id, &body.template_key)?;
    Ok(Json(json!({ "ok": true, "template_key": body.template_key.trim() })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PdfQuery {
    pub template: Option<String>,
    pub download: Option<String>,
    pub include_qr: Option<String>,
    pub qr_url: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1" | "true" | "yes" | "on")
    )
}

pub async fn pdf(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<PdfQuery>,
) -> Result<Response> {
    let options = PdfOptions {
        template: query.template.clone(),
        include_qr: flag(&query.include_qr),
        qr_url: query.qr_url.clone(),
    };
    let bytes = state.guidebooks.pdf(&user.user_id, &id, &options).await?;

    let disposition = if flag(&query.download) {
        format!("attachment; filename=\"guidebook-{}.pdf\"", id)
    } else {
        format!("inline; filename=\"guidebook-{}.pdf\"", id)
    };
    let mut response = (StatusCode::OK, bytes.to_vec()).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

pub async fn profile(State(state): State<SharedState>, user: AuthUser) -> Result<Json<PlanUsage>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.slots.usage(&user.user_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values() {
        assert!(flag(&Some("1".into())));
        assert!(flag(&Some("true".into())));
        assert!(!flag(&Some("0".into())));
        assert!(!flag(&None));
    }
}
