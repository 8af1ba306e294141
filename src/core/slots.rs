use crate::adapters::sqlite::SqliteStore;
use crate::core::cache::RenderCaches;
use crate::domain::model::{ActivationReport, Guidebook, PlanUsage, Profile};
use crate::utils::error::Result;
use std::sync::Arc;

/// 方案名額：計算上限、切換單一 guidebook、依方案重新分配啟用狀態
#[derive(Clone)]
pub struct SlotAccounting {
    store: Arc<SqliteStore>,
    caches: Arc<RenderCaches>,
}

impl SlotAccounting {
    pub fn new(store: Arc<SqliteStore>, caches: Arc<RenderCaches>) -> Self {
        Self { store, caches }
    }

    pub fn profile(&self, user_id: &str, email: Option<&str>) -> Result<Profile> {
        self.store.ensure_profile(user_id, email)
    }

    pub fn usage(&self, user_id: &str) -> Result<PlanUsage> {
        let profile = self.store.ensure_profile(user_id, None)?;
        Ok(PlanUsage {
            plan: profile.plan,
            guidebook_limit: profile.guidebook_limit,
            extra_slots: profile.extra_slots,
            active_count: self.store.count_active(user_id)?,
        })
    }

    pub fn can_activate(&self, user_id: &str) -> Result<bool> {
        let usage = self.usage(user_id)?;
        Ok(crate::domain::plan::has_capacity(
            usage.active_count,
            usage.guidebook_limit,
        ))
    }

    /// 依目前方案上限重新分配啟用狀態
    pub fn reconcile(&self, user_id: &str) -> Result<ActivationReport> {
        let profile = self.store.ensure_profile(user_id, None)?;
        let report = self.store.reconcile_active(user_id, profile.guidebook_limit)?;

        for id in report.activated.iter().chain(report.deactivated.iter()) {
            self.caches.invalidate(id);
        }
        if !report.activated.is_empty() || !report.deactivated.is_empty() {
            tracing::info!(
                "🔁 Reconciled {}: limit {}, +{} / -{}, {} active",
                user_id,
                report.guidebook_limit,
                report.activated.len(),
                report.deactivated.len(),
                report.active_count
            );
        }
        Ok(report)
    }

    /// 名額有變動或已超額時才重新分配，否則保留使用者自己選的啟用組合
    pub fn reconcile_if_changed(&self, user_id: &str, previous_limit: u32) -> Result<ActivationReport> {
        let usage = self.usage(user_id)?;
        if usage.guidebook_limit != previous_limit || usage.active_count > usage.guidebook_limit {
            return self.reconcile(user_id);
        }
        tracing::debug!("Limit for {} unchanged at {}, keeping active set", user_id, previous_limit);
        Ok(ActivationReport {
            guidebook_limit: usage.guidebook_limit,
            active_count: usage.active_count,
            activated: Vec::new(),
            deactivated: Vec::new(),
        })
    }

    pub fn activate(&self, user_id: &str, guidebook_id: &str) -> Result<Guidebook> {
        let profile = self.store.ensure_profile(user_id, None)?;
        let guidebook = self
            .store
            .activate_one(user_id, guidebook_id, profile.guidebook_limit)?;
        self.caches.invalidate(guidebook_id);
        tracing::info!("🟢 Activated guidebook {} for {}", guidebook_id, user_id);
        Ok(guidebook)
    }

    pub fn deactivate(&self, user_id: &str, guidebook_id: &str) -> Result<Guidebook> {
        let guidebook = self.store.deactivate_one(user_id, guidebook_id)?;
        self.caches.invalidate(guidebook_id);
        tracing::info!("⚪ Deactivated guidebook {} for {}", guidebook_id, user_id);
        Ok(guidebook)
    }

    /// 新建立的 guidebook：有空位就啟用，否則保持預覽狀態
    pub fn activate_if_capacity(&self, user_id: &str, guidebook_id: &str) -> Result<Guidebook> {
        if self.can_activate(user_id)? {
            self.activate(user_id, guidebook_id)
        } else {
            tracing::info!("Guidebook {} stays in preview, {} is at capacity", guidebook_id, user_id);
            self.store.get_owned(user_id, guidebook_id)
        }
    }
}
