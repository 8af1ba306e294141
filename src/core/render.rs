//! HTML rendering of guidebook records.
//!
//! Templates are plain HTML files embedded at compile time. `{{name}}`
//! placeholders are replaced with values from a context map; every value is
//! HTML-escaped (sections are assembled from escaped pieces before they reach
//! the template). Unknown placeholders render as empty strings.

use crate::domain::model::{GuidebookRecord, RecommendationItem};
use crate::utils::error::{AppError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Web,
    Pdf,
}

struct TemplateDef {
    key: &'static str,
    kind: TemplateKind,
    source: &'static str,
}

const TEMPLATES: &[TemplateDef] = &[
    TemplateDef {
        key: "template_1",
        kind: TemplateKind::Web,
        source: include_str!("../../templates/template_1.html"),
    },
    TemplateDef {
        key: "template_2",
        kind: TemplateKind::Web,
        source: include_str!("../../templates/template_2.html"),
    },
    TemplateDef {
        key: "template_pdf_basic",
        kind: TemplateKind::Pdf,
        source: include_str!("../../templates/template_pdf_basic.html"),
    },
    TemplateDef {
        key: "template_pdf_mobile",
        kind: TemplateKind::Pdf,
        source: include_str!("../../templates/template_pdf_mobile.html"),
    },
    TemplateDef {
        key: "template_pdf_qr",
        kind: TemplateKind::Pdf,
        source: include_str!("../../templates/template_pdf_qr.html"),
    },
];

pub const DEFAULT_WEB_TEMPLATE: &str = "template_1";
pub const DEFAULT_PDF_TEMPLATE: &str = "template_pdf_basic";

pub fn template_keys(kind: TemplateKind) -> Vec<&'static str> {
    TEMPLATES
        .iter()
        .filter(|t| t.kind == kind)
        .map(|t| t.key)
        .collect()
}

pub fn is_template(kind: TemplateKind, key: &str) -> bool {
    TEMPLATES.iter().any(|t| t.kind == kind && t.key == key)
}

fn template_source(kind: TemplateKind, key: &str) -> Result<&'static str> {
    TEMPLATES
        .iter()
        .find(|t| t.kind == kind && t.key == key)
        .map(|t| t.source)
        .ok_or_else(|| AppError::validation(format!("Unknown template: {}", key)))
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct Renderer {
    public_base_url: String,
    qr_service_url: String,
    placeholder: Regex,
}

impl Renderer {
    pub fn new(public_base_url: impl Into<String>, qr_service_url: impl Into<String>) -> Result<Self> {
        let placeholder =
            Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").map_err(|e| AppError::RenderError {
                message: format!("Invalid placeholder pattern: {}", e),
            })?;
        Ok(Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            qr_service_url: qr_service_url.into(),
            placeholder,
        })
    }

    /// 公開網址 `/guidebook/{id}`
    pub fn public_url(&self, guidebook_id: &str) -> String {
        format!("{}/guidebook/{}", self.public_base_url, guidebook_id)
    }

    pub fn slug_url(&self, slug: &str) -> String {
        format!("{}/g/{}", self.public_base_url, slug)
    }

    /// 網頁版；template_key 不存在時退回預設樣板
    pub fn render_web(&self, record: &GuidebookRecord, preview: bool) -> Result<String> {
        let key = if is_template(TemplateKind::Web, &record.guidebook.template_key) {
            record.guidebook.template_key.as_str()
        } else {
            DEFAULT_WEB_TEMPLATE
        };
        let source = template_source(TemplateKind::Web, key)?;

        let mut context = self.context(record);
        if preview {
            context.insert(
                "banner",
                "<div class=\"banner\">Preview: this guidebook is not live yet. Activate it to share the public link.</div>"
                    .to_string(),
            );
        }
        Ok(self.fill(source, &context))
    }

    /// PDF 用的 HTML；`qr_target` 有值時加入 QR code 區塊
    pub fn render_pdf_html(
        &self,
        record: &GuidebookRecord,
        template_key: &str,
        qr_target: Option<&str>,
    ) -> Result<String> {
        let source = template_source(TemplateKind::Pdf, template_key)?;
        let mut context = self.context(record);
        if let Some(target) = qr_target {
            context.insert("qr_block", self.qr_block(target));
        }
        Ok(self.fill(source, &context))
    }

    fn qr_block(&self, target: &str) -> String {
        let src = self.qr_service_url.replace("{data}", &encode_query(target));
        format!(
            "<div class=\"qr\"><img src=\"{}\" alt=\"QR code\"><div class=\"meta\">{}</div></div>",
            escape_html(&src),
            escape_html(target)
        )
    }

    fn fill(&self, source: &str, context: &HashMap<&'static str, String>) -> String {
        self.placeholder
            .replace_all(source, |caps: &regex::Captures| {
                context.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    fn image_src(&self, item: &RecommendationItem) -> Option<String> {
        if let Some(url) = non_empty(item.image_url.as_deref()) {
            return Some(url.to_string());
        }
        non_empty(item.photo_reference.as_deref()).map(|reference| {
            format!(
                "{}/api/place-photo?photo_reference={}&maxwidth=400",
                self.public_base_url,
                encode_query(reference)
            )
        })
    }

    fn context(&self, record: &GuidebookRecord) -> HashMap<&'static str, String> {
        let g = &record.guidebook;
        let tabs = &g.included_tabs;
        let mut ctx = HashMap::new();

        let property_name = if record.property.name.trim().is_empty() {
            "Guidebook".to_string()
        } else {
            record.property.name.clone()
        };
        ctx.insert("title", escape_html(&property_name));
        ctx.insert("property_name", escape_html(&property_name));
        ctx.insert("host_name", escape_html(&record.host.name));
        ctx.insert(
            "address",
            escape_html(&record.property.lookup_address().unwrap_or_default()),
        );
        let cover = non_empty(g.cover_image_url.as_deref()).unwrap_or_default();
        ctx.insert("cover_image_url", escape_html(cover));
        if !cover.is_empty() {
            ctx.insert(
                "cover_image",
                format!("<img class=\"cover\" src=\"{}\" alt=\"\">", escape_html(cover)),
            );
        }

        ctx.insert(
            "welcome_section",
            section(
                tabs,
                "welcome",
                "Welcome",
                paragraph(g.welcome_message.as_deref()),
            ),
        );

        let mut host = String::new();
        if let Some(photo) = non_empty(record.host.photo_url.as_deref()) {
            host.push_str(&format!("<img src=\"{}\" alt=\"\">", escape_html(photo)));
        }
        host.push_str(&format!("<p><strong>{}</strong></p>", escape_html(&record.host.name)));
        host.push_str(&paragraph(record.host.bio.as_deref()));
        host.push_str(&labelled("Contact", record.host.contact.as_deref()));
        ctx.insert(
            "host_section",
            section(tabs, "hostinfo", "Your Host", format!("<div class=\"host\">{}</div>", host)),
        );

        let checkin = [
            labelled("Check-in", g.check_in_time.as_deref()),
            labelled("Check-out", g.check_out_time.as_deref()),
            labelled("Access", g.access_info.as_deref()),
        ]
        .concat();
        ctx.insert("checkin_section", section(tabs, "checkin", "Check-in", checkin));

        let wifi = [
            labelled("Network", g.wifi_network.as_deref()),
            labelled("Password", g.wifi_password.as_deref()),
        ]
        .concat();
        ctx.insert("wifi_section", section(tabs, "wifi", "Wi-Fi", wifi));

        ctx.insert(
            "parking_section",
            section(tabs, "property", "Parking", paragraph(g.parking_info.as_deref())),
        );

        let safety = [
            labelled("Emergency contact", g.safety_info.emergency_contact.as_deref()),
            labelled(
                "Fire extinguisher",
                g.safety_info.fire_extinguisher_location.as_deref(),
            ),
        ]
        .concat();
        ctx.insert("safety_section", section(tabs, "property", "Safety", safety));

        let rules: String = g
            .rules
            .iter()
            .filter(|r| !r.trim().is_empty())
            .map(|r| format!("<li>{}</li>", escape_html(r)))
            .collect();
        let rules = if rules.is_empty() {
            rules
        } else {
            format!("<ul>{}</ul>", rules)
        };
        ctx.insert("rules_section", section(tabs, "rules", "House Rules", rules));

        ctx.insert(
            "food_section",
            section(tabs, "food", "Places to Eat", self.recommendations(&g.places_to_eat)),
        );
        ctx.insert(
            "activities_section",
            section(
                tabs,
                "activities",
                "Things to Do",
                self.recommendations(&g.things_to_do),
            ),
        );

        let manual: String = g
            .house_manual
            .iter()
            .filter(|m| !m.name.trim().is_empty())
            .map(|m| {
                let media = match (non_empty(m.media_url.as_deref()), m.media_type.as_deref()) {
                    (Some(url), Some("video")) => format!(
                        "<div class=\"meta\"><a href=\"{}\">Watch video</a></div>",
                        escape_html(url)
                    ),
                    (Some(url), _) => format!("<img src=\"{}\" alt=\"\">", escape_html(url)),
                    (None, _) => String::new(),
                };
                format!(
                    "<div class=\"item\"><div><strong>{}</strong><p>{}</p>{}</div></div>",
                    escape_html(&m.name),
                    escape_html(&m.description),
                    media
                )
            })
            .collect();
        ctx.insert(
            "house_manual_section",
            section(tabs, "property", "House Manual", manual),
        );

        let checkout: String = g
            .checkout_info
            .iter()
            .filter(|c| !c.name.trim().is_empty())
            .map(|c| {
                format!(
                    "<li><strong>{}</strong> {}</li>",
                    escape_html(&c.name),
                    escape_html(&c.description)
                )
            })
            .collect();
        let checkout = if checkout.is_empty() {
            checkout
        } else {
            format!("<ul>{}</ul>", checkout)
        };
        ctx.insert("checkout_section", section(tabs, "checkout", "Checkout", checkout));

        ctx.insert(
            "custom_sections",
            custom_sections(tabs, &g.custom_sections, &g.custom_tabs_meta),
        );

        let wifi_network = non_empty(g.wifi_network.as_deref()).unwrap_or_default();
        ctx.insert("wifi_network", escape_html(wifi_network));

        ctx
    }

    fn recommendations(&self, items: &[RecommendationItem]) -> String {
        items
            .iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| {
                let image = self
                    .image_src(item)
                    .map(|src| format!("<img src=\"{}\" alt=\"\">", escape_html(&src)))
                    .unwrap_or_default();
                let drive = item
                    .driving_minutes
                    .map(|m| format!(" · {} min drive", m))
                    .unwrap_or_default();
                format!(
                    "<div class=\"item\">{}<div><strong>{}</strong><p>{}</p><div class=\"meta\">{}{}</div></div></div>",
                    image,
                    escape_html(&item.name),
                    escape_html(&item.description),
                    escape_html(&item.address),
                    drive
                )
            })
            .collect()
    }
}

/// 沒有內容或未被 included_tabs 選取的段落不輸出
fn section(tabs: &[String], tab: &str, title: &str, body: String) -> String {
    if body.trim().is_empty() || !tab_included(tabs, tab) {
        return String::new();
    }
    format!(
        "<section id=\"{}\"><h2>{}</h2>{}</section>",
        tab,
        escape_html(title),
        body
    )
}

fn tab_included(tabs: &[String], tab: &str) -> bool {
    tabs.is_empty() || tabs.iter().any(|t| t == tab)
}

fn paragraph(text: Option<&str>) -> String {
    non_empty(text)
        .map(|t| format!("<p>{}</p>", escape_html(t)))
        .unwrap_or_default()
}

fn labelled(label: &str, value: Option<&str>) -> String {
    non_empty(value)
        .map(|v| format!("<p><strong>{}:</strong> {}</p>", escape_html(label), escape_html(v)))
        .unwrap_or_default()
}

fn custom_sections(
    tabs: &[String],
    sections: &serde_json::Map<String, Value>,
    meta: &serde_json::Map<String, Value>,
) -> String {
    let mut out = String::new();
    for (key, value) in sections {
        let title = meta
            .get(key)
            .and_then(|m| m.get("label").or_else(|| m.get("title")))
            .and_then(Value::as_str)
            .unwrap_or(key);
        let icon = meta
            .get(key)
            .and_then(|m| m.get("icon"))
            .and_then(Value::as_str)
            .map(|i| format!("{} ", i))
            .unwrap_or_default();

        let entries: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let body: String = entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(text) => paragraph(Some(text)),
                Value::Object(obj) => {
                    let name = obj
                        .get("name")
                        .or_else(|| obj.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let description = obj
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if name.is_empty() && description.is_empty() {
                        String::new()
                    } else {
                        format!(
                            "<div class=\"item\"><div><strong>{}</strong><p>{}</p></div></div>",
                            escape_html(name),
                            escape_html(description)
                        )
                    }
                }
                _ => String::new(),
            })
            .collect();

        out.push_str(&section(tabs, key, &format!("{}{}", icon, title), body));
    }
    out
}
