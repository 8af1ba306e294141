//! Subscription tiers and the guidebook slot policy.
//!
//! A plan grants a number of "active" guidebooks (publicly reachable and
//! counted against the quota). Paid plans may buy extra slots on top of the
//! base allowance. Whenever the allowance changes the user's guidebooks are
//! reconciled: the most recently edited ones stay live, the rest go dark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Growth,
    Pro,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Starter, Plan::Growth, Plan::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Growth => "growth",
            Plan::Pro => "pro",
        }
    }

    /// 未知的方案名稱一律視為 free
    pub fn from_name(name: &str) -> Plan {
        Self::parse_paid(name).unwrap_or(Plan::Free)
    }

    /// 只接受可以結帳的付費方案
    pub fn parse_paid(name: &str) -> Option<Plan> {
        match name.trim().to_ascii_lowercase().as_str() {
            "starter" => Some(Plan::Starter),
            "growth" => Some(Plan::Growth),
            "pro" => Some(Plan::Pro),
            _ => None,
        }
    }

    pub fn base_limit(&self) -> u32 {
        match self {
            Plan::Free => 0,
            Plan::Starter => 1,
            Plan::Growth => 3,
            Plan::Pro => 10,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 方案可同時啟用的 guidebook 數量；額外名額只在付費方案有效
pub fn guidebook_limit(plan: Plan, extra_slots: u32) -> u32 {
    if plan.is_paid() {
        plan.base_limit().saturating_add(extra_slots)
    } else {
        plan.base_limit()
    }
}

pub fn has_capacity(active_count: u32, limit: u32) -> bool {
    active_count < limit
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCandidate {
    pub id: String,
    pub active: bool,
    pub last_modified_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationPlan {
    /// 最終應該啟用的 guidebook，依新舊排序
    pub target_active: Vec<String>,
    pub activate: Vec<String>,
    pub deactivate: Vec<String>,
}

impl ActivationPlan {
    pub fn is_noop(&self) -> bool {
        self.activate.is_empty() && self.deactivate.is_empty()
    }
}

/// Keeps the `limit` most recently modified guidebooks active and turns the
/// rest off. Ties fall back to creation time, then id, so the outcome is
/// stable across repeated runs.
pub fn plan_activation(candidates: &[SlotCandidate], limit: u32) -> ActivationPlan {
    let mut ordered: Vec<&SlotCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.last_modified_time
            .cmp(&a.last_modified_time)
            .then_with(|| b.created_time.cmp(&a.created_time))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut plan = ActivationPlan::default();
    for (index, candidate) in ordered.into_iter().enumerate() {
        let keep = index < limit as usize;
        if keep {
            plan.target_active.push(candidate.id.clone());
            if !candidate.active {
                plan.activate.push(candidate.id.clone());
            }
        } else if candidate.active {
            plan.deactivate.push(candidate.id.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(id: &str, active: bool, modified_day: u32, created_day: u32) -> SlotCandidate {
        SlotCandidate {
            id: id.to_string(),
            active,
            last_modified_time: Utc.with_ymd_and_hms(2025, 1, modified_day, 0, 0, 0).unwrap(),
            created_time: Utc.with_ymd_and_hms(2025, 1, created_day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_plan_names() {
        assert_eq!(Plan::from_name("PRO"), Plan::Pro);
        assert_eq!(Plan::from_name(" growth "), Plan::Growth);
        assert_eq!(Plan::from_name("enterprise"), Plan::Free);
        assert_eq!(Plan::parse_paid("free"), None);
        assert_eq!(serde_json::to_string(&Plan::Starter).unwrap(), "\"starter\"");
    }

    #[test]
    fn test_guidebook_limit_table() {
        assert_eq!(guidebook_limit(Plan::Free, 0), 0);
        assert_eq!(guidebook_limit(Plan::Starter, 0), 1);
        assert_eq!(guidebook_limit(Plan::Growth, 0), 3);
        assert_eq!(guidebook_limit(Plan::Pro, 0), 10);
    }

    #[test]
    fn test_extra_slots_only_count_on_paid_plans() {
        assert_eq!(guidebook_limit(Plan::Free, 4), 0);
        assert_eq!(guidebook_limit(Plan::Starter, 2), 3);
        assert_eq!(guidebook_limit(Plan::Pro, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_has_capacity() {
        assert!(!has_capacity(0, 0));
        assert!(has_capacity(0, 1));
        assert!(!has_capacity(3, 3));
    }

    #[test]
    fn test_downgrade_keeps_most_recent() {
        let candidates = vec![
            candidate("old", true, 1, 1),
            candidate("newest", true, 20, 2),
            candidate("middle", true, 10, 3),
        ];

        let plan = plan_activation(&candidates, 1);
        assert_eq!(plan.target_active, vec!["newest"]);
        assert!(plan.activate.is_empty());
        assert_eq!(plan.deactivate, vec!["middle", "old"]);
    }

    #[test]
    fn test_upgrade_activates_top_n() {
        let candidates = vec![
            candidate("a", false, 5, 1),
            candidate("b", false, 6, 1),
            candidate("c", true, 7, 1),
            candidate("d", false, 1, 1),
        ];

        let plan = plan_activation(&candidates, 3);
        assert_eq!(plan.target_active, vec!["c", "b", "a"]);
        assert_eq!(plan.activate, vec!["b", "a"]);
        assert!(plan.deactivate.is_empty());
    }

    #[test]
    fn test_ties_break_on_created_then_id() {
        let candidates = vec![
            candidate("z", false, 5, 1),
            candidate("y", false, 5, 2),
            candidate("x", false, 5, 2),
        ];

        let plan = plan_activation(&candidates, 2);
        assert_eq!(plan.target_active, vec!["x", "y"]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let candidates = vec![candidate("a", true, 2, 1), candidate("b", false, 1, 1)];
        let plan = plan_activation(&candidates, 1);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_zero_limit_deactivates_everything() {
        let candidates = vec![candidate("a", true, 2, 1), candidate("b", true, 1, 1)];
        let plan = plan_activation(&candidates, 0);
        assert!(plan.target_active.is_empty());
        assert_eq!(plan.deactivate.len(), 2);
    }
}
