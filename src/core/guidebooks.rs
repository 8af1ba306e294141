//! Guidebook lifecycle: create, edit, publish, render and delete.

use crate::adapters::sqlite::SqliteStore;
use crate::core::cache::{ContentCache, RenderCaches};
use crate::core::render::{self, Renderer, TemplateKind};
use crate::core::slots::SlotAccounting;
use crate::domain::model::{
    Guidebook, GuidebookPayload, GuidebookRecord, GuidebookSummary, PlanUsage, RecommendationItem,
};
use crate::domain::ports::PdfRenderer;
use crate::utils::error::{AppError, Result};
use crate::utils::validation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const MAX_NAME_LEN: usize = 80;
pub const MAX_BIO_LEN: usize = 600;
pub const MAX_CONTACT_LEN: usize = 200;
pub const MAX_WELCOME_LEN: usize = 300;
pub const MAX_ACCESS_LEN: usize = 500;
pub const MAX_PARKING_LEN: usize = 300;
pub const MAX_ADDRESS_LEN: usize = 120;
pub const MAX_ZIP_LEN: usize = 20;
pub const MAX_WIFI_LEN: usize = 64;
pub const MAX_DESCRIPTION_LEN: usize = 300;
pub const MAX_RULES: usize = 15;
pub const MAX_RECOMMENDATIONS: usize = 8;
pub const MAX_CHECKOUT_ITEMS: usize = 8;
pub const MAX_MANUAL_ITEMS: usize = 20;
pub const MAX_CUSTOM_TABS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct CreatedGuidebook {
    pub guidebook_id: String,
    pub active: bool,
    pub public_slug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuidebookList {
    pub guidebooks: Vec<GuidebookSummary>,
    #[serde(flatten)]
    pub usage: PlanUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Published {
    pub guidebook_id: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct PdfOptions {
    pub template: Option<String>,
    pub include_qr: bool,
    pub qr_url: Option<String>,
}

/// 公開頁面的結果
#[derive(Debug, Clone, PartialEq)]
pub enum PublicPage {
    Html(String),
    Redirect(String),
}

fn trim_opt(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
}

fn check_len(field: &str, value: &Option<String>, max: usize) -> Result<()> {
    match value {
        Some(v) => validation::validate_max_len(field, v, max),
        None => Ok(()),
    }
}

fn check_link(field: &str, value: &Option<String>) -> Result<()> {
    match value {
        Some(v) => validation::validate_link_url(field, v),
        None => Ok(()),
    }
}

fn clean_items(items: &mut Vec<RecommendationItem>) {
    for item in items.iter_mut() {
        item.name = item.name.trim().to_string();
        item.address = item.address.trim().to_string();
        item.description = item.description.trim().to_string();
        trim_opt(&mut item.image_url);
    }
    items.retain(|item| !item.name.is_empty());
}

/// 去除多餘空白、丟掉空項目並檢查長度限制
pub fn normalize_payload(mut payload: GuidebookPayload) -> Result<GuidebookPayload> {
    for field in [
        &mut payload.property_name,
        &mut payload.host_name,
        &mut payload.host_bio,
        &mut payload.host_contact,
        &mut payload.host_photo_url,
        &mut payload.location,
        &mut payload.address_street,
        &mut payload.address_city_state,
        &mut payload.address_zip,
        &mut payload.welcome_message,
        &mut payload.parking_info,
        &mut payload.access_info,
        &mut payload.wifi_network,
        &mut payload.wifi_password,
        &mut payload.check_in_time,
        &mut payload.check_out_time,
        &mut payload.cover_image_url,
        &mut payload.template_key,
        &mut payload.safety_info.emergency_contact,
        &mut payload.safety_info.fire_extinguisher_location,
    ] {
        trim_opt(field);
    }

    let property_name = payload
        .property_name
        .as_deref()
        .ok_or_else(|| AppError::validation("property_name is required"))?;
    validation::validate_max_len("property_name", property_name, MAX_NAME_LEN)?;
    check_len("host_name", &payload.host_name, MAX_NAME_LEN)?;
    check_len("host_bio", &payload.host_bio, MAX_BIO_LEN)?;
    check_len("host_contact", &payload.host_contact, MAX_CONTACT_LEN)?;
    check_len("welcome_message", &payload.welcome_message, MAX_WELCOME_LEN)?;
    check_len("access_info", &payload.access_info, MAX_ACCESS_LEN)?;
    check_len("parking_info", &payload.parking_info, MAX_PARKING_LEN)?;
    check_len("location", &payload.location, MAX_ADDRESS_LEN)?;
    check_len("address_street", &payload.address_street, MAX_ADDRESS_LEN)?;
    check_len("address_city_state", &payload.address_city_state, MAX_ADDRESS_LEN)?;
    check_len("address_zip", &payload.address_zip, MAX_ZIP_LEN)?;
    check_len("wifi_network", &payload.wifi_network, MAX_WIFI_LEN)?;
    check_len("wifi_password", &payload.wifi_password, MAX_WIFI_LEN)?;
    check_link("host_photo_url", &payload.host_photo_url)?;
    check_link("cover_image_url", &payload.cover_image_url)?;

    if let Some(key) = payload.template_key.as_deref() {
        if !render::is_template(TemplateKind::Web, key) {
            return Err(AppError::validation(format!("Unknown template: {}", key)));
        }
    }

    payload.rules = payload
        .rules
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    validation::validate_max_items("rules", &payload.rules, MAX_RULES)?;
    for rule in &payload.rules {
        validation::validate_max_len("rules", rule, MAX_DESCRIPTION_LEN + MAX_NAME_LEN)?;
    }

    clean_items(&mut payload.things_to_do);
    clean_items(&mut payload.places_to_eat);
    for (field, items) in [
        ("things_to_do", &payload.things_to_do),
        ("places_to_eat", &payload.places_to_eat),
    ] {
        validation::validate_max_items(field, items, MAX_RECOMMENDATIONS)?;
        for item in items {
            validation::validate_max_len(field, &item.name, MAX_NAME_LEN)?;
            validation::validate_max_len(field, &item.address, MAX_ADDRESS_LEN)?;
            validation::validate_max_len(field, &item.description, MAX_DESCRIPTION_LEN)?;
            check_link(field, &item.image_url)?;
        }
    }

    payload.checkout_info.retain(|c| !c.name.trim().is_empty());
    validation::validate_max_items("checkout_info", &payload.checkout_info, MAX_CHECKOUT_ITEMS)?;
    for item in &payload.checkout_info {
        validation::validate_max_len("checkout_info", &item.name, MAX_NAME_LEN)?;
        validation::validate_max_len("checkout_info", &item.description, MAX_DESCRIPTION_LEN)?;
    }

    payload.house_manual.retain(|m| !m.name.trim().is_empty());
    validation::validate_max_items("house_manual", &payload.house_manual, MAX_MANUAL_ITEMS)?;
    for item in payload.house_manual.iter_mut() {
        trim_opt(&mut item.media_url);
        check_link("house_manual", &item.media_url)?;
    }

    if payload.custom_sections.len() > MAX_CUSTOM_TABS {
        return Err(AppError::validation(format!(
            "custom_sections accepts at most {} tabs",
            MAX_CUSTOM_TABS
        )));
    }

    Ok(payload)
}

pub struct GuidebookService {
    store: Arc<SqliteStore>,
    slots: SlotAccounting,
    caches: Arc<RenderCaches>,
    renderer: Arc<Renderer>,
    pdf: Arc<dyn PdfRenderer>,
    frontend_url: String,
}

impl GuidebookService {
    pub fn new(
        store: Arc<SqliteStore>,
        slots: SlotAccounting,
        caches: Arc<RenderCaches>,
        renderer: Arc<Renderer>,
        pdf: Arc<dyn PdfRenderer>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            slots,
            caches,
            renderer,
            pdf,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn create(&self, user_id: &str, payload: GuidebookPayload) -> Result<CreatedGuidebook> {
        let payload = normalize_payload(payload)?;
        let created = self.store.create_guidebook(user_id, &payload)?;
        tracing::info!("📘 Created guidebook {} for {}", created.id, user_id);

        let guidebook = self.slots.activate_if_capacity(user_id, &created.id)?;
        Ok(CreatedGuidebook {
            guidebook_id: guidebook.id,
            active: guidebook.active,
            public_slug: guidebook.public_slug,
        })
    }

    pub fn list(&self, user_id: &str) -> Result<GuidebookList> {
        Ok(GuidebookList {
            guidebooks: self.store.list_summaries(user_id)?,
            usage: self.slots.usage(user_id)?,
        })
    }

    pub fn get(&self, user_id: &str, id: &str) -> Result<GuidebookRecord> {
        self.store.get_owned(user_id, id)?;
        self.store
            .load_record(id)?
            .ok_or_else(|| AppError::not_found("Guidebook", id))
    }

    pub fn update(&self, user_id: &str, id: &str, payload: GuidebookPayload) -> Result<Guidebook> {
        let payload = normalize_payload(payload)?;
        let guidebook = self.store.update_guidebook(user_id, id, &payload)?;
        self.caches.invalidate(id);
        tracing::info!("✏️ Updated guidebook {}", id);
        Ok(guidebook)
    }

    pub fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        self.store.delete_guidebook(user_id, id)?;
        self.caches.invalidate(id);
        tracing::info!("🗑️ Deleted guidebook {} for {}", id, user_id);
        Ok(())
    }

    /// 渲染並儲存 HTML 快照
    pub fn publish(&self, user_id: &str, id: &str) -> Result<Published> {
        let record = self.get(user_id, id)?;
        let html = self.renderer.render_web(&record, false)?;
        let published_at = self.store.store_snapshot(id, &html)?;
        self.caches.invalidate(id);

        let url = match &record.guidebook.public_slug {
            Some(slug) => self.renderer.slug_url(slug),
            None => self.renderer.public_url(id),
        };
        Ok(Published {
            guidebook_id: id.to_string(),
            published_at,
            url,
        })
    }

    pub fn set_template(&self, user_id: &str, id: &str, template_key: &str) -> Result<()> {
        let key = template_key.trim();
        if !render::is_template(TemplateKind::Web, key) {
            return Err(AppError::validation(format!(
                "Unknown template: {}. Available: {}",
                key,
                render::template_keys(TemplateKind::Web).join(", ")
            )));
        }
        self.store.set_template(user_id, id, key)?;
        self.caches.invalidate(id);
        Ok(())
    }

    pub async fn pdf(&self, user_id: &str, id: &str, options: &PdfOptions) -> Result<Arc<Vec<u8>>> {
        let record = self.get(user_id, id)?;
        let template = options
            .template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(render::DEFAULT_PDF_TEMPLATE);
        if !render::is_template(TemplateKind::Pdf, template) {
            return Err(AppError::validation(format!(
                "Unknown PDF template: {}. Available: {}",
                template,
                render::template_keys(TemplateKind::Pdf).join(", ")
            )));
        }

        let qr_target = if options.include_qr || template == "template_pdf_qr" {
            Some(match options.qr_url.as_deref().filter(|u| !u.trim().is_empty()) {
                Some(url) => {
                    validation::validate_url("qr_url", url)
                        .map_err(|_| AppError::validation("qr_url must be an http(s) URL"))?;
                    url.to_string()
                }
                None => match &record.guidebook.public_slug {
                    Some(slug) => self.renderer.slug_url(slug),
                    None => self.renderer.public_url(id),
                },
            })
        } else {
            None
        };

        let key = ContentCache::<Arc<Vec<u8>>>::key(
            id,
            "pdf",
            &format!("{}|{}", template, qr_target.as_deref().unwrap_or_default()),
        );
        if let Some(bytes) = self.caches.pdf.get(&key) {
            tracing::debug!("PDF cache hit for {}", id);
            return Ok(bytes);
        }

        let html = self
            .renderer
            .render_pdf_html(&record, template, qr_target.as_deref())?;
        let bytes = Arc::new(self.pdf.render_pdf(&html).await?);
        self.caches.pdf.insert(key, bytes.clone());
        tracing::info!("📄 Rendered PDF for {} ({} bytes)", id, bytes.len());
        Ok(bytes)
    }

    fn render_cached(&self, record: &GuidebookRecord, preview: bool) -> Result<String> {
        let id = &record.guidebook.id;
        let kind = if preview { "preview" } else { "web" };
        let key = ContentCache::<String>::key(
            id,
            kind,
            &format!("{}|{}", record.guidebook.template_key, record.guidebook.last_modified_time),
        );
        if let Some(html) = self.caches.html.get(&key) {
            return Ok(html);
        }
        let html = self.renderer.render_web(record, preview)?;
        self.caches.html.insert(key, html.clone());
        Ok(html)
    }

    fn live_html(&self, record: &GuidebookRecord) -> Result<String> {
        match &record.guidebook.published_html {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.render_cached(record, false),
        }
    }

    /// `/guidebook/{id}`：未啟用時導向升級頁
    pub fn public_page(&self, id: &str) -> Result<PublicPage> {
        let record = self
            .store
            .load_record(id)?
            .ok_or_else(|| AppError::not_found("Guidebook", id))?;

        if !record.guidebook.active {
            let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
            return Ok(PublicPage::Redirect(format!(
                "{}/upgrade?guidebook_id={}",
                self.frontend_url, encoded
            )));
        }
        Ok(PublicPage::Html(self.live_html(&record)?))
    }

    pub fn page_by_slug(&self, slug: &str) -> Result<String> {
        match self.store.find_record_by_slug(slug)? {
            Some(record) if record.guidebook.active => self.live_html(&record),
            _ => Err(AppError::not_found("Guidebook", slug)),
        }
    }

    pub fn preview(&self, id: &str) -> Result<String> {
        let record = self
            .store
            .load_record(id)?
            .ok_or_else(|| AppError::not_found("Guidebook", id))?;
        self.render_cached(&record, true)
    }
}
