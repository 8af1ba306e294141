//! Stripe REST client and webhook signature verification.
//!
//! Stripe takes form-encoded bodies and answers JSON; only the handful of
//! endpoints billing needs are wrapped here.

use crate::domain::model::{CheckoutRequest, InvoiceSummary, SubscriptionLine, SubscriptionSnapshot};
use crate::domain::ports::BillingGateway;
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

/// 簽章時間戳容許的誤差 (秒)
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_secs(20))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_secs(20))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("💳 Stripe response status: {}", status);

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("Stripe request failed")
            .to_string();
        Err(AppError::UpstreamError {
            service: "stripe".to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

fn url_field(body: &Value) -> Result<String> {
    body.get("url")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| AppError::ProcessingError {
            message: "Stripe session response has no url".to_string(),
        })
}

fn data_array(body: &Value) -> &[Value] {
    body.get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// 由 Stripe subscription 物件 (API 回應或 webhook event) 取出需要的欄位
pub fn parse_subscription(value: &Value) -> Option<SubscriptionSnapshot> {
    let id = value.get("id")?.as_str()?.to_string();
    // customer 可能是 id 字串或展開後的物件
    let customer_id = match value.get("customer")? {
        Value::String(id) => id.clone(),
        other => other.get("id")?.as_str()?.to_string(),
    };

    let items = value
        .pointer("/items/data")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| {
                    let price_id = line
                        .pointer("/price/id")
                        .or_else(|| line.pointer("/plan/id"))?
                        .as_str()?
                        .to_string();
                    let quantity = line.get("quantity").and_then(Value::as_u64).unwrap_or(1);
                    Some(SubscriptionLine {
                        price_id,
                        quantity: quantity.min(u32::MAX as u64) as u32,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SubscriptionSnapshot {
        id,
        customer_id,
        status: value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("incomplete")
            .to_string(),
        created: value.get("created").and_then(Value::as_i64).unwrap_or(0),
        current_period_end: value.get("current_period_end").and_then(Value::as_i64),
        items,
    })
}

fn parse_invoice(value: &Value) -> Option<InvoiceSummary> {
    Some(InvoiceSummary {
        id: value.get("id")?.as_str()?.to_string(),
        status: value.get("status").and_then(Value::as_str).map(String::from),
        paid: value.get("paid").and_then(Value::as_bool),
        amount_paid: value.get("amount_paid").and_then(Value::as_i64),
        amount_due: value.get("amount_due").and_then(Value::as_i64),
        created: value.get("created").and_then(Value::as_i64),
        currency: value.get("currency").and_then(Value::as_str).map(String::from),
        hosted_invoice_url: value
            .get("hosted_invoice_url")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[async_trait]
impl BillingGateway for StripeClient {
    async fn find_or_create_customer(&self, email: &str, user_id: &str) -> Result<String> {
        let query = format!("email:'{}'", email.replace('\'', "\\'"));
        let found = self
            .send(self.get("/v1/customers/search").query(&[("query", query.as_str())]))
            .await?;

        if let Some(id) = data_array(&found)
            .first()
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
        {
            return Ok(id.to_string());
        }

        let created = self
            .send(self.post("/v1/customers").form(&[
                ("email", email),
                ("metadata[user_id]", user_id),
            ]))
            .await?;
        tracing::info!("💳 Created Stripe customer for user {}", user_id);

        created
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| AppError::ProcessingError {
                message: "Stripe customer response has no id".to_string(),
            })
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String> {
        let body = self
            .send(self.post("/v1/checkout/sessions").form(&[
                ("mode", "subscription"),
                ("customer", request.customer_id.as_str()),
                ("client_reference_id", request.user_id.as_str()),
                ("line_items[0][price]", request.price_id.as_str()),
                ("line_items[0][quantity]", "1"),
                ("success_url", request.success_url.as_str()),
                ("cancel_url", request.cancel_url.as_str()),
                ("metadata[plan]", request.plan_key.as_str()),
                ("metadata[user_id]", request.user_id.as_str()),
            ]))
            .await?;
        url_field(&body)
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let body = self
            .send(self.post("/v1/billing_portal/sessions").form(&[
                ("customer", customer_id),
                ("return_url", return_url),
            ]))
            .await?;
        url_field(&body)
    }

    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<SubscriptionSnapshot>> {
        let body = self
            .send(self.get("/v1/subscriptions").query(&[
                ("customer", customer_id),
                ("status", "all"),
                ("limit", "20"),
            ]))
            .await?;
        Ok(data_array(&body).iter().filter_map(parse_subscription).collect())
    }

    async fn list_invoices(&self, customer_id: &str, limit: u32) -> Result<Vec<InvoiceSummary>> {
        let limit = limit.clamp(1, 100).to_string();
        let body = self
            .send(
                self.get("/v1/invoices")
                    .query(&[("customer", customer_id), ("limit", limit.as_str())]),
            )
            .await?;
        Ok(data_array(&body).iter().filter_map(parse_invoice).collect())
    }
}

// ---- webhook signature ----

type HmacSha256 = Hmac<Sha256>;

fn signature_error(message: &str) -> AppError {
    AppError::SignatureError {
        message: message.to_string(),
    }
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| signature_error("Invalid webhook secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// 計算 `{timestamp}.{payload}` 的 v1 簽章 (hex)
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mac = signed_payload_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against the
/// raw request body. Any matching `v1` entry is accepted.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| signature_error("Missing timestamp"))?;
    if candidates.is_empty() {
        return Err(signature_error("Missing v1 signature"));
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(signature_error("Timestamp outside tolerance"));
    }

    let mac = signed_payload_mac(secret, timestamp, payload)?;
    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        if mac.clone().verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(signature_error("No matching signature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn test_signature_roundtrip_and_tolerance() {
        let payload = br#"{"type":"ping"}"#;
        let sig = compute_signature(SECRET, 1_700_000_000, payload).unwrap();
        let header = format!("t=1700000000,v1={}", sig);

        assert!(verify_signature(payload, &header, SECRET, 1_700_000_100).is_ok());
        assert!(verify_signature(payload, &header, SECRET, 1_700_000_301).is_err());
        assert!(verify_signature(b"tampered", &header, SECRET, 1_700_000_000).is_err());
        assert!(verify_signature(payload, &header, "other", 1_700_000_000).is_err());
    }

    #[test]
    fn test_signature_header_variants() {
        let payload = b"{}";
        let sig = compute_signature(SECRET, 10, payload).unwrap();

        let rotated = format!("t=10,v1=deadbeef,v1={},v0=ignored", sig);
        assert!(verify_signature(payload, &rotated, SECRET, 10).is_ok());
        assert!(verify_signature(payload, "v1=abc", SECRET, 10).is_err());
        assert!(verify_signature(payload, "t=10", SECRET, 10).is_err());
        assert!(matches!(
            verify_signature(payload, "garbage", SECRET, 10),
            Err(AppError::SignatureError { .. })
        ));
    }

    #[test]
    fn test_parse_subscription() {
        let value = json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "created": 1700000000,
            "current_period_end": 1702592000,
            "items": {"data": [
                {"price": {"id": "price_growth"}, "quantity": 1},
                {"price": {"id": "price_addon"}, "quantity": 3}
            ]}
        });

        let sub = parse_subscription(&value).unwrap();
        assert!(sub.is_live());
        assert_eq!(sub.items.len(), 2);
        assert_eq!(sub.items[1].quantity, 3);

        let expanded = json!({"id": "sub_2", "customer": {"id": "cus_2"}, "status": "canceled"});
        let sub = parse_subscription(&expanded).unwrap();
        assert_eq!(sub.customer_id, "cus_2");
        assert!(!sub.is_live());
        assert!(sub.items.is_empty());
    }

    #[tokio::test]
    async fn test_find_or_create_customer_creates_when_missing() {
        let server = MockServer::start();
        let search = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/customers/search")
                .header("authorization", "Bearer sk_test");
            then.status(200).json_body(json!({"data": []}));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/customers")
                .body_contains("email=host%40example.com");
            then.status(200).json_body(json!({"id": "cus_new"}));
        });

        let stripe = StripeClient::new("sk_test", server.base_url());
        let id = stripe
            .find_or_create_customer("host@example.com", "user-1")
            .await
            .unwrap();

        search.assert();
        create.assert();
        assert_eq!(id, "cus_new");
    }

    #[tokio::test]
    async fn test_checkout_session_and_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1/checkout/sessions")
                .body_contains("mode=subscription")
                .body_contains("client_reference_id=user-1")
                .body_contains("metadata%5Bplan%5D=growth");
            then.status(200)
                .json_body(json!({"id": "cs_1", "url": "https://checkout.stripe.test/cs_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/v1/billing_portal/sessions");
            then.status(400)
                .json_body(json!({"error": {"message": "No such customer"}}));
        });

        let stripe = StripeClient::new("sk_test", server.base_url());
        let url = stripe
            .create_checkout_session(&CheckoutRequest {
                customer_id: "cus_1".into(),
                user_id: "user-1".into(),
                price_id: "price_growth".into(),
                plan_key: "growth".into(),
                success_url: "https://app.test/ok".into(),
                cancel_url: "https://app.test/cancel".into(),
            })
            .await
            .unwrap();
        assert_eq!(url, "https://checkout.stripe.test/cs_1");

        let err = stripe
            .create_portal_session("cus_missing", "https://app.test")
            .await
            .unwrap_err();
        match err {
            AppError::UpstreamError { status, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "No such customer");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_subscriptions_and_invoices() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/subscriptions")
                .query_param("customer", "cus_1")
                .query_param("status", "all");
            then.status(200).json_body(json!({"data": [
                {"id": "sub_1", "customer": "cus_1", "status": "active", "created": 5,
                 "items": {"data": [{"price": {"id": "price_pro"}, "quantity": 1}]}}
            ]}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/invoices").query_param("limit", "5");
            then.status(200).json_body(json!({"data": [
                {"id": "in_1", "status": "paid", "paid": true, "amount_paid": 1900, "currency": "usd"}
            ]}));
        });

        let stripe = StripeClient::new("sk_test", server.base_url());
        let subs = stripe.list_subscriptions("cus_1").await.unwrap();
        assert_eq!(subs[0].items[0].price_id, "price_pro");

        let invoices = stripe.list_invoices("cus_1", 5).await.unwrap();
        assert_eq!(invoices[0].amount_paid, Some(1900));
    }
}
