use crate::adapters::{CommandPdfRenderer, GooglePlacesClient, OpenAiClient, SqliteStore, StripeClient};
use crate::api::auth::AuthSettings;
use crate::config::TomlConfig;
use crate::core::billing::BillingSettings;
use crate::core::cache::RenderCaches;
use crate::core::{BillingService, GuidebookService, RecommendationEngine, Renderer, SlotAccounting};
use crate::domain::ports::{BillingGateway, CompletionClient, PdfRenderer, PlacesClient};
use crate::utils::error::{AppError, Result};
use std::sync::Arc;

/// 外部服務的實作；未設定的服務為 None
pub struct Ports {
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub places: Option<Arc<dyn PlacesClient>>,
    pub billing: Option<Arc<dyn BillingGateway>>,
    pub pdf: Arc<dyn PdfRenderer>,
}

impl Ports {
    pub fn from_config(config: &TomlConfig) -> Self {
        let completion = config.openai.as_ref().map(|openai| {
            Arc::new(OpenAiClient::new(
                openai.api_key.clone(),
                config.openai_base_url(),
                openai.timeout_seconds.unwrap_or(60),
            )) as Arc<dyn CompletionClient>
        });
        let places = config.google.as_ref().map(|google| {
            Arc::new(GooglePlacesClient::new(
                google.api_key.clone(),
                config.google_base_url(),
                google.timeout_seconds.unwrap_or(10),
            )) as Arc<dyn PlacesClient>
        });
        let billing = config.stripe.as_ref().map(|stripe| {
            Arc::new(StripeClient::new(
                stripe.secret_key.clone(),
                config.stripe_base_url(),
            )) as Arc<dyn BillingGateway>
        });
        let (program, args) = config.pdf_program();

        Self {
            completion,
            places,
            billing,
            pdf: Arc::new(CommandPdfRenderer::new(program, args)),
        }
    }
}

pub struct AppState {
    pub auth: AuthSettings,
    pub slots: SlotAccounting,
    pub guidebooks: GuidebookService,
    pub billing: Option<BillingService>,
    pub recommendations: RecommendationEngine,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: &TomlConfig, store: Arc<SqliteStore>, ports: Ports) -> Result<Self> {
        let caches = Arc::new(RenderCaches::default());
        let slots = SlotAccounting::new(store.clone(), caches.clone());
        let renderer = Arc::new(Renderer::new(
            config.server.public_base_url.clone(),
            config.qr_service_url(),
        )?);

        let guidebooks = GuidebookService::new(
            store.clone(),
            slots.clone(),
            caches,
            renderer,
            ports.pdf,
            config.server.frontend_url.clone(),
        );

        let billing = match (&config.stripe, ports.billing) {
            (Some(section), Some(gateway)) => Some(BillingService::new(
                store,
                gateway,
                slots.clone(),
                BillingSettings::from(section),
            )),
            _ => None,
        };
        if billing.is_none() {
            tracing::warn!("⚠️ Stripe is not configured, billing endpoints are disabled");
        }

        Ok(Self {
            auth: AuthSettings {
                jwt_secret: config.auth.jwt_secret.clone(),
                audience: config.auth.audience.clone(),
            },
            slots,
            guidebooks,
            billing,
            recommendations: RecommendationEngine::new(ports.completion, ports.places),
        })
    }

    pub fn from_config(config: &TomlConfig, store: Arc<SqliteStore>) -> Result<SharedState> {
        Ok(Arc::new(Self::new(config, store, Ports::from_config(config))?))
    }

    pub fn billing(&self) -> Result<&BillingService> {
        self.billing.as_ref().ok_or_else(|| AppError::MissingConfigError {
            field: "stripe".to_string(),
        })
    }
}
