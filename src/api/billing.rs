use crate::api::auth::AuthUser;
use crate::api::state::SharedState;
use crate::core::billing::{BillingSummary, WebhookOutcome};
use crate::domain::model::PlanUsage;
use crate::utils::error::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

const STRIPE_SIGNATURE: &str = "stripe-signature";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutBody {
    pub email: Option<String>,
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectUrl {
    pub url: String,
}

pub async fn create_checkout_session(
    State(state): State<SharedState>,
    user: AuthUser,
    body: Option<Json<CheckoutBody>>,
) -> Result<Json<RedirectUrl>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let email = body.email.as_deref().or(user.email.as_deref());

    let url = state
        .billing()?
        .create_checkout(&user.user_id, email, body.plan.as_deref())
        .await?;
    Ok(Json(RedirectUrl { url }))
}

pub async fn create_portal_session(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<RedirectUrl>> {
    let url = state.billing()?.create_portal(&user.user_id).await?;
    Ok(Json(RedirectUrl { url }))
}

pub async fn refresh_plan(State(state): State<SharedState>, user: AuthUser) -> Result<Json<PlanUsage>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.billing()?.refresh_plan(&user.user_id).await?))
}

pub async fn summary(State(state): State<SharedState>, user: AuthUser) -> Result<Json<BillingSummary>> {
    state.slots.profile(&user.user_id, user.email.as_deref())?;
    Ok(Json(state.billing()?.summary(&user.user_id).await?))
}

/// Stripe webhook：簽章驗證需要原始 body
pub async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>> {
    let signature = headers.get(STRIPE_SIGNATURE).and_then(|v| v.to_str().ok());
    Ok(Json(state.billing()?.handle_webhook(&body, signature)?))
}
