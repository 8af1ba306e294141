pub mod billing;
pub mod cache;
pub mod guidebooks;
pub mod maintenance;
pub mod recommendations;
pub mod render;
pub mod slots;

pub use billing::BillingService;
pub use guidebooks::GuidebookService;
pub use recommendations::RecommendationEngine;
pub use render::Renderer;
pub use slots::SlotAccounting;
pub use crate::utils::error::Result;
