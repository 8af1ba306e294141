use crate::domain::model::{
    CheckoutRequest, InvoiceSummary, PhotoBytes, PlaceCandidate, PlaceDetails,
    SubscriptionSnapshot,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Chat completion that must answer with a JSON document.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete_json(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait PlacesClient: Send + Sync {
    async fn text_search(&self, query: &str, location: Option<&str>) -> Result<Vec<PlaceCandidate>>;
    async fn details(&self, place_id: &str) -> Result<Option<PlaceDetails>>;
    async fn driving_minutes(&self, origin: &str, destination: &str) -> Result<Option<u32>>;
    async fn photo(&self, photo_reference: &str, max_width: u32) -> Result<PhotoBytes>;
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn find_or_create_customer(&self, email: &str, user_id: &str) -> Result<String>;
    /// 回傳 Stripe checkout 頁面網址
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String>;
    /// 回傳 billing portal 網址
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;
    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<SubscriptionSnapshot>>;
    async fn list_invoices(&self, customer_id: &str, limit: u32) -> Result<Vec<InvoiceSummary>>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>>;
}
