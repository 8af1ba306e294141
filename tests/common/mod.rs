#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use guidewise::adapters::SqliteStore;
use guidewise::api::auth::{sign_token, Claims};
use guidewise::api::{self, AppState, Ports};
use guidewise::domain::ports::{CompletionClient, PdfRenderer};
use guidewise::TomlConfig;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret-0123";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub struct FakePdf;

#[async_trait]
impl PdfRenderer for FakePdf {
    async fn render_pdf(&self, html: &str) -> guidewise::Result<Vec<u8>> {
        Ok(format!("%PDF-1.7\n{}", html.len()).into_bytes())
    }
}

/// 固定回傳同一份 JSON 的 completion
pub struct CannedCompletion(pub Value);

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete_json(&self, _model: &str, _system: &str, _user: &str) -> guidewise::Result<Value> {
        Ok(self.0.clone())
    }
}

pub fn config_toml(db_path: &str, stripe_base: Option<&str>, google_base: Option<&str>) -> String {
    let mut toml = format!(
        r#"
[server]
port = 5001
public_base_url = "https://api.guidewise.test"
frontend_url = "https://app.guidewise.test"

[database]
path = "{db}"

[auth]
jwt_secret = "{secret}"
"#,
        db = db_path.replace('\\', "/"),
        secret = JWT_SECRET
    );
    if let Some(base) = stripe_base {
        toml.push_str(&format!(
            r#"
[stripe]
secret_key = "sk_test_123"
webhook_secret = "{webhook}"
base_url = "{base}"
success_url = "https://app.guidewise.test/upgrade?success=1"
cancel_url = "https://app.guidewise.test/pricing"
portal_return_url = "https://app.guidewise.test/dashboard"

[stripe.prices]
starter = "price_starter"
growth = "price_growth"
pro = "price_pro"
addon = "price_addon"
"#,
            webhook = WEBHOOK_SECRET,
            base = base
        ));
    }
    if let Some(base) = google_base {
        toml.push_str(&format!(
            r#"
[google]
api_key = "google-key"
base_url = "{}"
"#,
            base
        ));
    }
    toml
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<SqliteStore>,
    _dir: TempDir,
}

pub struct Options<'a> {
    pub stripe_base: Option<&'a str>,
    pub google_base: Option<&'a str>,
    pub completion: Option<Arc<dyn CompletionClient>>,
}

impl Default for Options<'_> {
    fn default() -> Self {
        Self {
            stripe_base: Some("http://127.0.0.1:9"),
            google_base: None,
            completion: None,
        }
    }
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with(Options::default())
    }

    pub fn with(options: Options<'_>) -> Result<Self> {
        let dir = TempDir::new()?;
        let db_path = dir.path().join("guidewise.db");
        let config = TomlConfig::from_toml_str(&config_toml(
            &db_path.to_string_lossy(),
            options.stripe_base,
            options.google_base,
        ))?;

        let store = Arc::new(SqliteStore::open(&db_path)?);
        let from_config = Ports::from_config(&config);
        let ports = Ports {
            completion: options.completion,
            places: from_config.places,
            billing: from_config.billing,
            pdf: Arc::new(FakePdf),
        };
        let state = Arc::new(AppState::new(&config, store.clone(), ports)?);

        Ok(Self {
            router: api::router(state, &[]),
            store,
            _dir: dir,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        Ok(self.router.clone().oneshot(request).await?)
    }
}

pub fn token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        exp: chrono::Utc::now().timestamp() + 3600,
        aud: None,
    };
    sign_token(JWT_SECRET, &claims).expect("sign token")
}

pub fn authed(method: &str, uri: &str, user_id: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn anonymous(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn body_bytes(response: Response<Body>) -> Result<Vec<u8>> {
    Ok(response.into_body().collect().await?.to_bytes().to_vec())
}

pub async fn body_json(response: Response<Body>) -> Result<Value> {
    Ok(serde_json::from_slice(&body_bytes(response).await?)?)
}

pub fn sample_guidebook(name: &str) -> Value {
    serde_json::json!({
        "property_name": name,
        "host_name": "Mia",
        "location": "Tainan",
        "address_street": "12 Shennong St",
        "address_city_state": "Tainan, TW",
        "welcome_message": "Welcome home!",
        "wifi_network": "Beach-5G",
        "wifi_password": "sunset123",
        "check_in_time": "15:00",
        "check_out_time": "11:00",
        "rules": ["No smoking", "Quiet after 22:00"],
        "places_to_eat": [
            { "name": "Ah-Tang Noodles", "address": "1 Zhongyi Rd", "description": "Beef soup" }
        ]
    })
}

/// 以測試 webhook secret 簽好的 Stripe event 請求
pub fn webhook_request(event: &Value) -> Result<Request<Body>> {
    let payload = event.to_string();
    let now = chrono::Utc::now().timestamp();
    let signature =
        guidewise::adapters::stripe::compute_signature(WEBHOOK_SECRET, now, payload.as_bytes())?;

    Ok(Request::builder()
        .method("POST")
        .uri("/api/billing/webhook")
        .header("Stripe-Signature", format!("t={},v1={}", now, signature))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))?)
}

pub fn checkout_completed(user_id: &str, plan: &str) -> Value {
    checkout_completed_for(user_id, plan, "sub_1")
}

pub fn checkout_completed_for(user_id: &str, plan: &str, subscription_id: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_checkout_{}", subscription_id),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": format!("cs_{}", subscription_id),
            "customer": format!("cus_{}", user_id),
            "client_reference_id": user_id,
            "subscription": subscription_id,
            "metadata": { "plan": plan }
        }}
    })
}

/// `customer.subscription.*` event，單一 price 一行
pub fn subscription_event(
    event_type: &str,
    subscription_id: &str,
    customer_id: &str,
    status: &str,
    price_id: &str,
    quantity: u32,
) -> Value {
    serde_json::json!({
        "id": format!("evt_{}_{}", subscription_id, status),
        "type": event_type,
        "data": { "object": {
            "id": subscription_id,
            "customer": customer_id,
            "status": status,
            "created": 1_700_000_000,
            "items": { "data": [ { "price": { "id": price_id }, "quantity": quantity } ] }
        }}
    })
}
