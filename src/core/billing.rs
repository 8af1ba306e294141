//! Stripe billing glue: checkout, portal, plan refresh, summary and webhooks.
//!
//! Extra slots always come from the addon subscription ledger in the store,
//! one row per Stripe subscription, so event order and redelivery do not
//! change the count. A reconcile only runs when the allowance moves.

use crate::adapters::sqlite::{PlanChange, SqliteStore};
use crate::adapters::stripe::{parse_subscription, verify_signature};
use crate::config::toml_config::{StripePrices, StripeSection};
use crate::core::slots::SlotAccounting;
use crate::domain::model::{
    ActivationReport, CheckoutRequest, InvoiceSummary, PlanUsage, Profile, SubscriptionSnapshot,
};
use crate::domain::plan::Plan;
use crate::domain::ports::BillingGateway;
use crate::utils::error::{AppError, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub const ADDON_KEY: &str = "addon";
pub const DEFAULT_CHECKOUT_PLAN: &str = "growth";

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
    pub prices: StripePrices,
}

impl From<&StripeSection> for BillingSettings {
    fn from(section: &StripeSection) -> Self {
        Self {
            webhook_secret: section.webhook_secret.clone(),
            success_url: section.success_url.clone(),
            cancel_url: section.cancel_url.clone(),
            portal_return_url: section.portal_return_url.clone(),
            prices: section.prices.clone(),
        }
    }
}

impl BillingSettings {
    pub fn price_for(&self, key: &str) -> Option<&str> {
        match key {
            "starter" => self.prices.starter.as_deref(),
            "growth" => self.prices.growth.as_deref(),
            "pro" => self.prices.pro.as_deref(),
            ADDON_KEY => self.prices.addon.as_deref(),
            _ => None,
        }
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        [Plan::Starter, Plan::Growth, Plan::Pro]
            .into_iter()
            .find(|plan| self.price_for(plan.as_str()) == Some(price_id))
    }

    pub fn is_addon_price(&self, price_id: &str) -> bool {
        self.prices.addon.as_deref() == Some(price_id)
    }
}

/// 一個 subscription 對方案與額外名額的影響
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionEffect {
    pub plan: Option<Plan>,
    pub extra_slots: Option<u32>,
}

pub fn subscription_effect(settings: &BillingSettings, sub: &SubscriptionSnapshot) -> SubscriptionEffect {
    let mut effect = SubscriptionEffect::default();
    for line in &sub.items {
        if let Some(plan) = settings.plan_for_price(&line.price_id) {
            effect.plan = match effect.plan {
                Some(current) if current.base_limit() >= plan.base_limit() => Some(current),
                _ => Some(plan),
            };
        } else if settings.is_addon_price(&line.price_id) {
            effect.extra_slots = Some(effect.extra_slots.unwrap_or(0).saturating_add(line.quantity));
        }
    }
    effect
}

#[derive(Debug, Clone, Serialize)]
pub struct StripeSummary {
    pub customer_id: Option<String>,
    pub subscription: Option<SubscriptionSnapshot>,
    pub upcoming_invoice: Option<InvoiceSummary>,
    pub invoices: Vec<InvoiceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingSummary {
    pub plan: Plan,
    pub guidebook_limit: u32,
    pub active_count: u32,
    pub extra_slots: u32,
    pub stripe: StripeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub event_type: String,
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ActivationReport>,
}

impl WebhookOutcome {
    fn ignored(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            handled: false,
            user_id: None,
            report: None,
        }
    }
}

pub struct BillingService {
    store: Arc<SqliteStore>,
    gateway: Arc<dyn BillingGateway>,
    slots: SlotAccounting,
    settings: BillingSettings,
}

impl BillingService {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: Arc<dyn BillingGateway>,
        slots: SlotAccounting,
        settings: BillingSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            slots,
            settings,
        }
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    async fn customer_for(&self, profile: &Profile, email: Option<&str>) -> Result<String> {
        if let Some(customer_id) = &profile.stripe_customer_id {
            return Ok(customer_id.clone());
        }
        let email = email
            .or(profile.email.as_deref())
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AppError::validation("email is required to start checkout"))?;

        let customer_id = self
            .gateway
            .find_or_create_customer(email, &profile.user_id)
            .await?;
        self.store.set_customer_id(&profile.user_id, &customer_id)?;
        Ok(customer_id)
    }

    /// 建立 checkout session，回傳付款頁網址
    pub async fn create_checkout(
        &self,
        user_id: &str,
        email: Option<&str>,
        plan_key: Option<&str>,
    ) -> Result<String> {
        let profile = self.slots.profile(user_id, email)?;
        let key = plan_key
            .map(|k| k.trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_CHECKOUT_PLAN.to_string());

        if key == ADDON_KEY {
            if !profile.plan.is_paid() {
                return Err(AppError::Forbidden {
                    message: "Extra guidebook slots require a paid plan".to_string(),
                });
            }
        } else {
            if Plan::parse_paid(&key).is_none() {
                return Err(AppError::validation(format!("Unknown plan: {}", key)));
            }
            let live = matches!(profile.subscription_status.as_deref(), Some("active" | "trialing"));
            if profile.plan.is_paid() && live {
                let redirect = match &profile.stripe_customer_id {
                    Some(customer_id) => Some(
                        self.gateway
                            .create_portal_session(customer_id, &self.settings.portal_return_url)
                            .await?,
                    ),
                    None => None,
                };
                return Err(AppError::Conflict {
                    message: "You already have an active subscription. Manage it from the billing portal."
                        .to_string(),
                    redirect,
                });
            }
        }

        let price_id = self
            .settings
            .price_for(&key)
            .ok_or_else(|| AppError::MissingConfigError {
                field: format!("stripe.prices.{}", key),
            })?
            .to_string();
        let customer_id = self.customer_for(&profile, email).await?;

        let url = self
            .gateway
            .create_checkout_session(&CheckoutRequest {
                customer_id,
                user_id: user_id.to_string(),
                price_id,
                plan_key: key.clone(),
                success_url: self.settings.success_url.clone(),
                cancel_url: self.settings.cancel_url.clone(),
            })
            .await?;
        tracing::info!("💳 Checkout session for {} ({})", user_id, key);
        Ok(url)
    }

    pub async fn create_portal(&self, user_id: &str) -> Result<String> {
        let profile = self.slots.profile(user_id, None)?;
        let customer_id = profile
            .stripe_customer_id
            .ok_or_else(|| AppError::not_found("Stripe customer", user_id))?;
        self.gateway
            .create_portal_session(&customer_id, &self.settings.portal_return_url)
            .await
    }

    /// 由 Stripe 拉回最新訂閱狀態，寫入 profile 後重新分配
    pub async fn refresh_plan(&self, user_id: &str) -> Result<PlanUsage> {
        let profile = self.slots.profile(user_id, None)?;
        if let Some(customer_id) = &profile.stripe_customer_id {
            let subscriptions = self.gateway.list_subscriptions(customer_id).await?;
            let mut change = self.plan_from_subscriptions(customer_id, &subscriptions);
            change.extra_slots = self
                .store
                .replace_addon_subscriptions(user_id, &self.live_addons(&subscriptions))?;
            self.store.apply_plan_change(user_id, &change)?;
            tracing::info!(
                "🔄 Refreshed plan for {}: {} (+{} slots)",
                user_id,
                change.plan,
                change.extra_slots
            );
        }
        self.slots.reconcile_if_changed(user_id, profile.guidebook_limit)?;
        self.slots.usage(user_id)
    }

    /// live 訂閱中的 addon 數量，依訂閱 id 分列
    fn live_addons(&self, subscriptions: &[SubscriptionSnapshot]) -> Vec<(String, u32)> {
        subscriptions
            .iter()
            .filter(|s| s.is_live())
            .filter_map(|s| {
                subscription_effect(&self.settings, s)
                    .extra_slots
                    .map(|quantity| (s.id.clone(), quantity))
            })
            .collect()
    }

    fn plan_from_subscriptions(&self, customer_id: &str, subscriptions: &[SubscriptionSnapshot]) -> PlanChange {
        let mut live: Vec<&SubscriptionSnapshot> = subscriptions.iter().filter(|s| s.is_live()).collect();
        live.sort_by(|a, b| b.created.cmp(&a.created));

        let mut change = PlanChange {
            plan: Plan::Free,
            extra_slots: 0,
            stripe_customer_id: Some(customer_id.to_string()),
            stripe_subscription_id: None,
            subscription_status: None,
        };
        for sub in live {
            let effect = subscription_effect(&self.settings, sub);
            // 最新的一筆方案訂閱決定 plan
            if change.stripe_subscription_id.is_none() {
                if let Some(plan) = effect.plan {
                    change.plan = plan;
                    change.stripe_subscription_id = Some(sub.id.clone());
                    change.subscription_status = Some(sub.status.clone());
                }
            }
            change.extra_slots = change
                .extra_slots
                .saturating_add(effect.extra_slots.unwrap_or(0));
        }
        change
    }

    /// 帳務概況；Stripe 錯誤放在 `error` 欄位，不讓整個請求失敗
    pub async fn summary(&self, user_id: &str) -> Result<BillingSummary> {
        let usage = self.slots.usage(user_id)?;
        let profile = self.slots.profile(user_id, None)?;

        let mut summary = BillingSummary {
            plan: usage.plan,
            guidebook_limit: usage.guidebook_limit,
            active_count: usage.active_count,
            extra_slots: usage.extra_slots,
            stripe: StripeSummary {
                customer_id: profile.stripe_customer_id.clone(),
                subscription: None,
                upcoming_invoice: None,
                invoices: Vec::new(),
            },
            error: None,
        };

        let Some(customer_id) = profile.stripe_customer_id.as_deref() else {
            return Ok(summary);
        };

        let lookup = async {
            let subscriptions = self.gateway.list_subscriptions(customer_id).await?;
            let invoices = self.gateway.list_invoices(customer_id, 10).await?;
            Ok::<_, AppError>((subscriptions, invoices))
        };
        match lookup.await {
            Ok((subscriptions, invoices)) => {
                summary.stripe.subscription = subscriptions
                    .iter()
                    .filter(|s| s.is_live())
                    .max_by_key(|s| s.created)
                    .or_else(|| subscriptions.iter().max_by_key(|s| s.created))
                    .cloned();
                summary.stripe.upcoming_invoice = invoices
                    .iter()
                    .find(|i| matches!(i.status.as_deref(), Some("draft" | "open")))
                    .cloned();
                summary.stripe.invoices = invoices;
            }
            Err(e) => {
                tracing::warn!("⚠️ Stripe summary failed for {}: {}", user_id, e);
                summary.error = Some(e.user_friendly_message());
            }
        }
        Ok(summary)
    }

    pub fn handle_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        self.handle_webhook_at(payload, signature, chrono::Utc::now().timestamp())
    }

    pub fn handle_webhook_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookOutcome> {
        let signature = signature.ok_or_else(|| AppError::SignatureError {
            message: "Missing Stripe-Signature header".to_string(),
        })?;
        verify_signature(payload, signature, &self.settings.webhook_secret, now)?;

        let event: Value = serde_json::from_slice(payload)?;
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object = event.pointer("/data/object").cloned().unwrap_or(Value::Null);
        tracing::info!("📨 Stripe webhook: {}", event_type);

        match event_type.as_str() {
            "checkout.session.completed" => self.on_checkout_completed(&event_type, &object),
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.on_subscription_changed(&event_type, &object, false)
            }
            "customer.subscription.deleted" => self.on_subscription_changed(&event_type, &object, true),
            _ => {
                tracing::debug!("Ignoring Stripe event {}", event_type);
                Ok(WebhookOutcome::ignored(&event_type))
            }
        }
    }

    fn on_checkout_completed(&self, event_type: &str, session: &Value) -> Result<WebhookOutcome> {
        let str_at = |pointer: &str| session.pointer(pointer).and_then(Value::as_str);
        let customer_id = str_at("/customer");

        let user_id = match str_at("/client_reference_id").or_else(|| str_at("/metadata/user_id")) {
            Some(user_id) => user_id.to_string(),
            None => match customer_id.map(|c| self.store.find_profile_by_customer(c)).transpose()? {
                Some(Some(profile)) => profile.user_id,
                _ => {
                    tracing::warn!("⚠️ Checkout completed for an unknown user, ignoring");
                    return Ok(WebhookOutcome::ignored(event_type));
                }
            },
        };

        let profile = self.store.ensure_profile(&user_id, str_at("/customer_details/email"))?;
        let plan_key = str_at("/metadata/plan").unwrap_or(DEFAULT_CHECKOUT_PLAN);
        let subscription_id = str_at("/subscription");

        let change = if plan_key == ADDON_KEY {
            // 若 subscription.created 已先到，保留它記下的數量
            let extra_slots = match subscription_id {
                Some(subscription_id) => self
                    .store
                    .record_addon_subscription(&user_id, subscription_id, 1, false)?,
                None => {
                    tracing::warn!("⚠️ Addon checkout for {} has no subscription id", user_id);
                    self.store.addon_slots(&user_id)?
                }
            };
            PlanChange {
                plan: profile.plan,
                extra_slots,
                stripe_customer_id: customer_id.map(String::from),
                stripe_subscription_id: profile.stripe_subscription_id.clone(),
                subscription_status: profile.subscription_status.clone(),
            }
        } else {
            PlanChange {
                plan: Plan::from_name(plan_key),
                extra_slots: self.store.addon_slots(&user_id)?,
                stripe_customer_id: customer_id.map(String::from),
                stripe_subscription_id: subscription_id.map(String::from),
                subscription_status: Some("active".to_string()),
            }
        };
        self.store.apply_plan_change(&user_id, &change)?;
        tracing::info!("✅ Checkout completed for {}: {}", user_id, plan_key);

        let report = self.slots.reconcile_if_changed(&user_id, profile.guidebook_limit)?;
        Ok(WebhookOutcome {
            event_type: event_type.to_string(),
            handled: true,
            user_id: Some(user_id),
            report: Some(report),
        })
    }

    fn on_subscription_changed(
        &self,
        event_type: &str,
        object: &Value,
        deleted: bool,
    ) -> Result<WebhookOutcome> {
        let Some(sub) = parse_subscription(object) else {
            tracing::warn!("⚠️ {} without a usable subscription object", event_type);
            return Ok(WebhookOutcome::ignored(event_type));
        };
        let Some(profile) = self.store.find_profile_by_customer(&sub.customer_id)? else {
            tracing::warn!("⚠️ {} for unknown customer {}, ignoring", event_type, sub.customer_id);
            return Ok(WebhookOutcome::ignored(event_type));
        };

        let effect = subscription_effect(&self.settings, &sub);
        let live = !deleted && sub.is_live();

        let mut change = PlanChange {
            plan: profile.plan,
            extra_slots: profile.extra_slots,
            stripe_customer_id: Some(sub.customer_id.clone()),
            stripe_subscription_id: profile.stripe_subscription_id.clone(),
            subscription_status: profile.subscription_status.clone(),
        };
        let is_current = profile.stripe_subscription_id.as_deref() == Some(sub.id.as_str());
        // 已結束的舊方案訂閱不影響目前方案
        let is_plan_subscription = if live {
            effect.plan.is_some() || is_current
        } else {
            is_current || (effect.plan.is_some() && profile.stripe_subscription_id.is_none())
        };

        if is_plan_subscription {
            change.stripe_subscription_id = Some(sub.id.clone());
            change.subscription_status = Some(sub.status.clone());
            change.plan = if live {
                effect.plan.unwrap_or(profile.plan)
            } else {
                Plan::Free
            };
        }
        change.extra_slots = match effect.extra_slots {
            Some(quantity) if live => {
                self.store
                    .record_addon_subscription(&profile.user_id, &sub.id, quantity, true)?
            }
            Some(_) => self.store.end_addon_subscription(&profile.user_id, &sub.id)?,
            None => self.store.addon_slots(&profile.user_id)?,
        };

        self.store.apply_plan_change(&profile.user_id, &change)?;
        tracing::info!(
            "🧾 {} for {}: plan {} (+{} slots, status {})",
            event_type,
            profile.user_id,
            change.plan,
            change.extra_slots,
            sub.status
        );

        let report = self
            .slots
            .reconcile_if_changed(&profile.user_id, profile.guidebook_limit)?;
        Ok(WebhookOutcome {
            event_type: event_type.to_string(),
            handled: true,
            user_id: Some(profile.user_id),
            report: Some(report),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::SubscriptionLine;

    fn settings() -> BillingSettings {
        BillingSettings {
            webhook_secret: "whsec_test".into(),
            success_url: "https://app.test/upgrade?success=1".into(),
            cancel_url: "https://app.test/pricing".into(),
            portal_return_url: "https://app.test/dashboard".into(),
            prices: StripePrices {
                starter: Some("price_starter".into()),
                growth: Some("price_growth".into()),
                pro: Some("price_pro".into()),
                addon: Some("price_addon".into()),
            },
        }
    }

    fn sub(lines: &[(&str, u32)]) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: "sub_1".into(),
            customer_id: "cus_1".into(),
            status: "active".into(),
            created: 1,
            current_period_end: None,
            items: lines
                .iter()
                .map(|(price, quantity)| SubscriptionLine {
                    price_id: price.to_string(),
                    quantity: *quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn test_price_mapping() {
        let s = settings();
        assert_eq!(s.plan_for_price("price_pro"), Some(Plan::Pro));
        assert_eq!(s.plan_for_price("price_addon"), None);
        assert!(s.is_addon_price("price_addon"));
        assert_eq!(s.price_for("growth"), Some("price_growth"));
        assert_eq!(s.price_for("enterprise"), None);
    }

    #[test]
    fn test_subscription_effect() {
        let s = settings();
        assert_eq!(
            subscription_effect(&s, &sub(&[("price_growth", 1), ("price_addon", 2)])),
            SubscriptionEffect {
                plan: Some(Plan::Growth),
                extra_slots: Some(2)
            }
        );
        assert_eq!(
            subscription_effect(&s, &sub(&[("price_starter", 1), ("price_pro", 1)])).plan,
            Some(Plan::Pro)
        );
        assert_eq!(
            subscription_effect(&s, &sub(&[("price_unknown", 1)])),
            SubscriptionEffect::default()
        );
    }
}
