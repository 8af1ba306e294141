//! HTTP surface: routes, bearer auth and shared state.

pub mod auth;
pub mod billing;
pub mod guidebooks;
pub mod public;
pub mod recommendations;
pub mod state;

pub use auth::{AuthSettings, AuthUser, Claims};
pub use state::{AppState, Ports, SharedState};

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static("x-guidebook-url"),
            HeaderName::from_static("x-guidebook-preview"),
        ])
        .max_age(Duration::from_secs(60 * 60));

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim_end_matches('/')).ok())
        .collect();
    if allowed.is_empty() {
        base.allow_origin(AllowOrigin::any())
    } else {
        base.allow_origin(AllowOrigin::list(allowed))
    }
}

pub fn router(state: SharedState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/generate", post(guidebooks::generate))
        .route("/guidebooks", get(guidebooks::list))
        .route("/guidebooks/activate_for_user", post(guidebooks::activate_for_user))
        .route(
            "/guidebooks/{id}",
            get(guidebooks::get_one)
                .put(guidebooks::update)
                .delete(guidebooks::delete),
        )
        .route("/guidebooks/{id}/publish", post(guidebooks::publish))
        .route("/guidebooks/{id}/activate", post(guidebooks::activate))
        .route("/guidebooks/{id}/deactivate", post(guidebooks::deactivate))
        .route("/guidebook/{id}/template", post(guidebooks::set_template))
        .route("/guidebook/{id}/pdf", get(guidebooks::pdf))
        .route("/profile", get(guidebooks::profile))
        .route("/billing/create-checkout-session", post(billing::create_checkout_session))
        .route("/billing/create-portal-session", post(billing::create_portal_session))
        .route("/billing/refresh-plan", post(billing::refresh_plan))
        .route("/billing/summary", get(billing::summary))
        .route("/billing/webhook", post(billing::webhook))
        .route("/ai-food", post(recommendations::ai_food))
        .route("/ai-activities", post(recommendations::ai_activities))
        .route("/ai/{kind}", post(recommendations::ai_kind))
        .route("/places/search", post(recommendations::places_search))
        .route("/places/enrich", get(recommendations::places_enrich))
        .route("/place-photo", get(recommendations::place_photo));

    Router::new()
        .nest("/api", api)
        .route("/guidebook/{id}", get(public::guidebook_page))
        .route("/g/{slug}", get(public::slug_page))
        .route("/preview/{id}", get(public::preview_page))
        .route("/healthz", get(public::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}
