//! GuideWise backend: guidebook records, rendering, recommendations and
//! subscription-based activation for short-term rental hosts.

pub mod adapters;
pub mod api;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};
pub use config::TomlConfig;

pub use app::{build_app, serve};
pub use domain::plan::{guidebook_limit, Plan};
pub use utils::error::{AppError, Result};
