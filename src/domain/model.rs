use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::Plan;

pub type UserId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
    pub bio: Option<String>,
    pub contact: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
    pub address_street: Option<String>,
    pub address_city_state: Option<String>,
    pub address_zip: Option<String>,
    pub location: Option<String>,
}

impl Property {
    /// 推薦與距離計算使用的地址；沒有 location 時由地址欄位組合
    pub fn lookup_address(&self) -> Option<String> {
        if let Some(location) = self.location.as_deref().filter(|l| !l.trim().is_empty()) {
            return Some(location.to_string());
        }

        let parts: Vec<&str> = [
            self.address_street.as_deref(),
            self.address_city_state.as_deref(),
            self.address_zip.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// 推薦項目：同時用於 AI 回應與儲存在 guidebook 的清單
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driving_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HouseManualItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyInfo {
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub fire_extinguisher_location: Option<String>,
}

/// 建立與編輯 guidebook 共用的表單內容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidebookPayload {
    pub property_name: Option<String>,
    pub host_name: Option<String>,
    pub host_bio: Option<String>,
    pub host_contact: Option<String>,
    pub host_photo_url: Option<String>,
    pub location: Option<String>,
    pub address_street: Option<String>,
    pub address_city_state: Option<String>,
    pub address_zip: Option<String>,
    pub welcome_message: Option<String>,
    pub parking_info: Option<String>,
    pub access_info: Option<String>,
    pub wifi_network: Option<String>,
    pub wifi_password: Option<String>,
    pub check_in_time: Option<String>,
    pub check_out_time: Option<String>,
    pub cover_image_url: Option<String>,
    pub safety_info: SafetyInfo,
    pub rules: Vec<String>,
    pub things_to_do: Vec<RecommendationItem>,
    pub places_to_eat: Vec<RecommendationItem>,
    pub checkout_info: Vec<CheckoutItem>,
    pub house_manual: Vec<HouseManualItem>,
    pub included_tabs: Vec<String>,
    pub custom_sections: serde_json::Map<String, serde_json::Value>,
    pub custom_tabs_meta: serde_json::Map<String, serde_json::Value>,
    pub template_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guidebook {
    pub id: String,
    pub user_id: UserId,
    pub host_id: i64,
    pub property_id: i64,
    pub check_in_time: Option<String>,
    pub check_out_time: Option<String>,
    pub access_info: Option<String>,
    pub wifi_network: Option<String>,
    pub wifi_password: Option<String>,
    pub welcome_message: Option<String>,
    pub parking_info: Option<String>,
    pub cover_image_url: Option<String>,
    pub safety_info: SafetyInfo,
    pub rules: Vec<String>,
    pub things_to_do: Vec<RecommendationItem>,
    pub places_to_eat: Vec<RecommendationItem>,
    pub checkout_info: Vec<CheckoutItem>,
    pub house_manual: Vec<HouseManualItem>,
    pub included_tabs: Vec<String>,
    pub custom_sections: serde_json::Map<String, serde_json::Value>,
    pub custom_tabs_meta: serde_json::Map<String, serde_json::Value>,
    pub template_key: String,
    pub active: bool,
    pub public_slug: Option<String>,
    #[serde(skip_serializing)]
    pub published_html: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
}

/// guidebook 連同 host 與 property 的完整資料
#[derive(Debug, Clone, Serialize)]
pub struct GuidebookRecord {
    #[serde(flatten)]
    pub guidebook: Guidebook,
    pub host: Host,
    pub property: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidebookSummary {
    pub id: String,
    pub property_name: Option<String>,
    pub template_key: String,
    pub cover_image_url: Option<String>,
    pub active: bool,
    pub public_slug: Option<String>,
    pub created_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub email: Option<String>,
    pub plan: Plan,
    pub guidebook_limit: u32,
    pub extra_slots: u32,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub plan: Plan,
    pub guidebook_limit: u32,
    pub extra_slots: u32,
    pub active_count: u32,
}

/// reconcile 的結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub guidebook_limit: u32,
    pub active_count: u32,
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
}

// ---- Google Places ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceCandidate {
    pub place_id: String,
    pub name: String,
    pub address: Option<String>,
    pub photo_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub place_id: String,
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub photo_reference: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PhotoBytes {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// ---- Stripe ----

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub user_id: UserId,
    pub price_id: String,
    pub plan_key: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionLine {
    pub price_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub created: i64,
    pub current_period_end: Option<i64>,
    pub items: Vec<SubscriptionLine>,
}

impl SubscriptionSnapshot {
    pub fn is_live(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: String,
    pub status: Option<String>,
    pub paid: Option<bool>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub created: Option<i64>,
    pub currency: Option<String>,
    pub hosted_invoice_url: Option<String>,
}
