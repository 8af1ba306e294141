//! SQLite persistence for hosts, properties, guidebooks, rules and profiles.
//!
//! The schema is created on open and grown in place with additive
//! `ALTER TABLE ... ADD COLUMN` statements, so older database files keep
//! working after upgrades. All multi-row changes run inside a transaction;
//! the connection itself sits behind a mutex.

use crate::domain::model::{
    ActivationReport, Guidebook, GuidebookPayload, GuidebookRecord, GuidebookSummary, Host,
    Profile, Property, SafetyInfo,
};
use crate::domain::plan::{self, Plan, SlotCandidate};
use crate::utils::error::{AppError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_TEMPLATE_KEY: &str = "template_1";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS host (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    bio TEXT,
    contact TEXT,
    photo_url TEXT
);

CREATE TABLE IF NOT EXISTS property (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    address_street TEXT,
    address_city_state TEXT,
    address_zip TEXT
);

CREATE TABLE IF NOT EXISTS guidebook (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    host_id INTEGER NOT NULL REFERENCES host(id),
    property_id INTEGER NOT NULL REFERENCES property(id),
    check_in_time TEXT,
    check_out_time TEXT,
    access_info TEXT,
    cover_image_url TEXT,
    things_to_do TEXT NOT NULL DEFAULT '[]',
    places_to_eat TEXT NOT NULL DEFAULT '[]',
    created_time TEXT NOT NULL,
    last_modified_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guidebook_id TEXT NOT NULL REFERENCES guidebook(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    text TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    email TEXT,
    plan TEXT NOT NULL DEFAULT 'free',
    guidebook_limit INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS addon_subscription (
    subscription_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    ended INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

/// 開機時補上的欄位 (table, column, declaration)
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("property", "location", "TEXT"),
    ("guidebook", "wifi_network", "TEXT"),
    ("guidebook", "wifi_password", "TEXT"),
    ("guidebook", "welcome_message", "TEXT"),
    ("guidebook", "parking_info", "TEXT"),
    ("guidebook", "safety_info", "TEXT NOT NULL DEFAULT '{}'"),
    ("guidebook", "checkout_info", "TEXT NOT NULL DEFAULT '[]'"),
    ("guidebook", "house_manual", "TEXT NOT NULL DEFAULT '[]'"),
    ("guidebook", "included_tabs", "TEXT NOT NULL DEFAULT '[]'"),
    ("guidebook", "custom_sections", "TEXT NOT NULL DEFAULT '{}'"),
    ("guidebook", "custom_tabs_meta", "TEXT NOT NULL DEFAULT '{}'"),
    ("guidebook", "template_key", "TEXT NOT NULL DEFAULT 'template_1'"),
    ("guidebook", "active", "INTEGER NOT NULL DEFAULT 0"),
    ("guidebook", "public_slug", "TEXT"),
    ("guidebook", "published_html", "TEXT"),
    ("guidebook", "published_at", "TEXT"),
    ("profiles", "extra_slots", "INTEGER NOT NULL DEFAULT 0"),
    ("profiles", "stripe_customer_id", "TEXT"),
    ("profiles", "stripe_subscription_id", "TEXT"),
    ("profiles", "subscription_status", "TEXT"),
];

const INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_guidebook_public_slug
    ON guidebook(public_slug) WHERE public_slug IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_guidebook_user ON guidebook(user_id);
CREATE INDEX IF NOT EXISTS idx_rule_guidebook ON rule(guidebook_id);
CREATE INDEX IF NOT EXISTS idx_profiles_customer ON profiles(stripe_customer_id);
CREATE INDEX IF NOT EXISTS idx_addon_subscription_user ON addon_subscription(user_id);
"#;

const GUIDEBOOK_COLUMNS: &str = "g.id, g.user_id, g.host_id, g.property_id, g.check_in_time, \
     g.check_out_time, g.access_info, g.wifi_network, g.wifi_password, g.welcome_message, \
     g.parking_info, g.cover_image_url, g.safety_info, g.things_to_do, g.places_to_eat, \
     g.checkout_info, g.house_manual, g.included_tabs, g.custom_sections, g.custom_tabs_meta, \
     g.template_key, g.active, g.public_slug, g.published_html, g.published_at, \
     g.created_time, g.last_modified_time";

const PROFILE_COLUMNS: &str = "user_id, email, plan, guidebook_limit, extra_slots, \
     stripe_customer_id, stripe_subscription_id, subscription_status, updated_at";

/// 寫入 profiles 的方案變更
#[derive(Debug, Clone, PartialEq)]
pub struct PlanChange {
    pub plan: Plan,
    pub extra_slots: u32,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub guidebooks: usize,
    pub hosts: usize,
    pub properties: usize,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Database mutex was poisoned, recovering connection");
            poisoned.into_inner()
        })
    }

    // ---- profiles ----

    /// 取得 profile，不存在時建立 free 方案
    pub fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> Result<Profile> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO profiles (user_id, email, plan, guidebook_limit, extra_slots, updated_at)
             VALUES (?1, ?2, 'free', 0, 0, ?3)",
            params![user_id, email, Utc::now()],
        )?;
        if let Some(email) = email {
            conn.execute(
                "UPDATE profiles SET email = ?2 WHERE user_id = ?1 AND email IS NULL",
                params![user_id, email],
            )?;
        }
        load_profile(&conn, user_id)?.ok_or_else(|| AppError::not_found("Profile", user_id))
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let conn = self.lock();
        load_profile(&conn, user_id)
    }

    pub fn find_profile_by_customer(&self, customer_id: &str) -> Result<Option<Profile>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM profiles WHERE stripe_customer_id = ?1",
            PROFILE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![customer_id], row_to_profile)
            .optional()?)
    }

    pub fn set_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE profiles SET stripe_customer_id = ?2, updated_at = ?3 WHERE user_id = ?1",
            params![user_id, customer_id, Utc::now()],
        )?;
        Ok(())
    }

    /// 更新方案並重新計算 guidebook_limit
    pub fn apply_plan_change(&self, user_id: &str, change: &PlanChange) -> Result<Profile> {
        let conn = self.lock();
        let limit = plan::guidebook_limit(change.plan, change.extra_slots);
        conn.execute(
            "INSERT OR IGNORE INTO profiles (user_id, plan, guidebook_limit, extra_slots, updated_at)
             VALUES (?1, 'free', 0, 0, ?2)",
            params![user_id, Utc::now()],
        )?;
        conn.execute(
            "UPDATE profiles SET
                plan = ?2,
                extra_slots = ?3,
                guidebook_limit = ?4,
                stripe_customer_id = COALESCE(?5, stripe_customer_id),
                stripe_subscription_id = ?6,
                subscription_status = ?7,
                updated_at = ?8
             WHERE user_id = ?1",
            params![
                user_id,
                change.plan.as_str(),
                change.extra_slots,
                limit,
                change.stripe_customer_id,
                change.stripe_subscription_id,
                change.subscription_status,
                Utc::now(),
            ],
        )?;
        load_profile(&conn, user_id)?.ok_or_else(|| AppError::not_found("Profile", user_id))
    }

    // ---- addon subscriptions ----
    //
    // 每個 addon 訂閱各自記一列；profiles.extra_slots 永遠是未結束列的 quantity 總和。
    // 已結束的列保留下來，晚到的 created/checkout 事件不會讓它復活。

    /// 寫入 addon 訂閱數量並回傳目前的額外名額總數。
    /// `overwrite = false` 時只在沒有紀錄的情況下新增。
    pub fn record_addon_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        quantity: u32,
        overwrite: bool,
    ) -> Result<u32> {
        let conn = self.lock();
        if overwrite {
            conn.execute(
                "INSERT INTO addon_subscription (subscription_id, user_id, quantity, ended, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(subscription_id) DO UPDATE SET
                    quantity = excluded.quantity,
                    updated_at = excluded.updated_at
                 WHERE addon_subscription.ended = 0",
                params![subscription_id, user_id, quantity, Utc::now()],
            )?;
        } else {
            conn.execute(
                "INSERT OR IGNORE INTO addon_subscription (subscription_id, user_id, quantity, ended, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![subscription_id, user_id, quantity, Utc::now()],
            )?;
        }
        addon_slots(&conn, user_id)
    }

    /// 標記 addon 訂閱已結束
    pub fn end_addon_subscription(&self, user_id: &str, subscription_id: &str) -> Result<u32> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO addon_subscription (subscription_id, user_id, quantity, ended, updated_at)
             VALUES (?1, ?2, 0, 1, ?3)
             ON CONFLICT(subscription_id) DO UPDATE SET
                quantity = 0,
                ended = 1,
                updated_at = excluded.updated_at",
            params![subscription_id, user_id, Utc::now()],
        )?;
        addon_slots(&conn, user_id)
    }

    /// 以 Stripe 上的 live addon 訂閱取代本地紀錄
    pub fn replace_addon_subscriptions(&self, user_id: &str, live: &[(String, u32)]) -> Result<u32> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "UPDATE addon_subscription SET quantity = 0, ended = 1, updated_at = ?2 WHERE user_id = ?1",
            params![user_id, now],
        )?;
        for (subscription_id, quantity) in live {
            tx.execute(
                "INSERT INTO addon_subscription (subscription_id, user_id, quantity, ended, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(subscription_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    quantity = excluded.quantity,
                    ended = 0,
                    updated_at = excluded.updated_at",
                params![subscription_id, user_id, quantity, now],
            )?;
        }
        let total = addon_slots(&tx, user_id)?;
        tx.commit()?;
        Ok(total)
    }

    pub fn addon_slots(&self, user_id: &str) -> Result<u32> {
        let conn = self.lock();
        addon_slots(&conn, user_id)
    }

    // ---- guidebooks ----

    pub fn create_guidebook(&self, user_id: &str, payload: &GuidebookPayload) -> Result<Guidebook> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO host (user_id, name, bio, contact, photo_url) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                payload.host_name.as_deref().unwrap_or("Host"),
                payload.host_bio,
                payload.host_contact,
                payload.host_photo_url,
            ],
        )?;
        let host_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO property (user_id, name, address_street, address_city_state, address_zip, location)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                payload.property_name.as_deref().unwrap_or_default(),
                payload.address_street,
                payload.address_city_state,
                payload.address_zip,
                payload.location,
            ],
        )?;
        let property_id = tx.last_insert_rowid();

        let id = uuid::Uuid::new_v4().to_string();
        let template_key = payload
            .template_key
            .as_deref()
            .unwrap_or(DEFAULT_TEMPLATE_KEY);

        tx.execute(
            "INSERT INTO guidebook (id, user_id, host_id, property_id, template_key, active,
                created_time, last_modified_time)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![id, user_id, host_id, property_id, template_key, now],
        )?;
        write_guidebook_content(&tx, &id, payload, now)?;
        replace_rules(&tx, &id, &payload.rules)?;

        let guidebook = load_guidebook(&tx, &id)?
            .ok_or_else(|| AppError::not_found("Guidebook", id.clone()))?;
        tx.commit()?;
        Ok(guidebook)
    }

    /// 覆寫可編輯欄位，並清除已發佈的快照
    pub fn update_guidebook(
        &self,
        user_id: &str,
        id: &str,
        payload: &GuidebookPayload,
    ) -> Result<Guidebook> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing = owned_guidebook(&tx, user_id, id)?;
        let now = Utc::now();

        tx.execute(
            "UPDATE host SET name = ?2, bio = ?3, contact = ?4, photo_url = COALESCE(?5, photo_url)
             WHERE id = ?1",
            params![
                existing.host_id,
                payload.host_name.as_deref().unwrap_or("Host"),
                payload.host_bio,
                payload.host_contact,
                payload.host_photo_url,
            ],
        )?;
        tx.execute(
            "UPDATE property SET name = ?2, address_street = ?3, address_city_state = ?4,
                address_zip = ?5, location = ?6
             WHERE id = ?1",
            params![
                existing.property_id,
                payload.property_name.as_deref().unwrap_or_default(),
                payload.address_street,
                payload.address_city_state,
                payload.address_zip,
                payload.location,
            ],
        )?;
        if let Some(template_key) = payload.template_key.as_deref() {
            tx.execute(
                "UPDATE guidebook SET template_key = ?2 WHERE id = ?1",
                params![id, template_key],
            )?;
        }
        write_guidebook_content(&tx, id, payload, now)?;
        tx.execute(
            "UPDATE guidebook SET published_html = NULL, published_at = NULL WHERE id = ?1",
            params![id],
        )?;
        replace_rules(&tx, id, &payload.rules)?;

        let guidebook =
            load_guidebook(&tx, id)?.ok_or_else(|| AppError::not_found("Guidebook", id))?;
        tx.commit()?;
        Ok(guidebook)
    }

    pub fn get_guidebook(&self, id: &str) -> Result<Option<Guidebook>> {
        let conn = self.lock();
        load_guidebook(&conn, id)
    }

    pub fn get_owned(&self, user_id: &str, id: &str) -> Result<Guidebook> {
        let conn = self.lock();
        owned_guidebook(&conn, user_id, id)
    }

    pub fn load_record(&self, id: &str) -> Result<Option<GuidebookRecord>> {
        let conn = self.lock();
        match load_guidebook(&conn, id)? {
            Some(guidebook) => Ok(Some(attach_relations(&conn, guidebook)?)),
            None => Ok(None),
        }
    }

    pub fn find_record_by_slug(&self, slug: &str) -> Result<Option<GuidebookRecord>> {
        let conn = self.lock();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM guidebook WHERE public_slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => match load_guidebook(&conn, &id)? {
                Some(guidebook) => Ok(Some(attach_relations(&conn, guidebook)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn list_summaries(&self, user_id: &str) -> Result<Vec<GuidebookSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT g.id, p.name, g.template_key, g.cover_image_url, g.active, g.public_slug,
                    g.created_time, g.last_modified_time
             FROM guidebook g
             LEFT JOIN property p ON p.id = g.property_id
             WHERE g.user_id = ?1
             ORDER BY g.created_time DESC, g.id",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(GuidebookSummary {
                    id: row.get(0)?,
                    property_name: row.get(1)?,
                    template_key: row.get(2)?,
                    cover_image_url: row.get(3)?,
                    active: row.get(4)?,
                    public_slug: row.get(5)?,
                    created_time: row.get(6)?,
                    last_modified_time: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_guidebook(&self, user_id: &str, id: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        owned_guidebook(&tx, user_id, id)?;
        tx.execute("DELETE FROM rule WHERE guidebook_id = ?1", params![id])?;
        tx.execute("DELETE FROM guidebook WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_template(&self, user_id: &str, id: &str, template_key: &str) -> Result<()> {
        let conn = self.lock();
        owned_guidebook(&conn, user_id, id)?;
        conn.execute(
            "UPDATE guidebook SET template_key = ?2, published_html = NULL, published_at = NULL,
                last_modified_time = ?3
             WHERE id = ?1",
            params![id, template_key, Utc::now()],
        )?;
        Ok(())
    }

    pub fn store_snapshot(&self, id: &str, html: &str) -> Result<DateTime<Utc>> {
        let conn = self.lock();
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE guidebook SET published_html = ?2, published_at = ?3 WHERE id = ?1",
            params![id, html, now],
        )?;
        if updated == 0 {
            return Err(AppError::not_found("Guidebook", id));
        }
        Ok(now)
    }

    pub fn count_active(&self, user_id: &str) -> Result<u32> {
        let conn = self.lock();
        count_active(&conn, user_id)
    }

    // ---- slot accounting ----

    /// Reorders the user's active set against `limit` in one transaction.
    pub fn reconcile_active(&self, user_id: &str, limit: u32) -> Result<ActivationReport> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let candidates = slot_candidates(&tx, user_id)?;
        let plan = plan::plan_activation(&candidates, limit);

        for id in &plan.deactivate {
            tx.execute("UPDATE guidebook SET active = 0 WHERE id = ?1", params![id])?;
        }
        for id in &plan.activate {
            ensure_slug(&tx, id)?;
            tx.execute("UPDATE guidebook SET active = 1 WHERE id = ?1", params![id])?;
        }

        let active_count = count_active(&tx, user_id)?;
        tx.commit()?;

        Ok(ActivationReport {
            guidebook_limit: limit,
            active_count,
            activated: plan.activate,
            deactivated: plan.deactivate,
        })
    }

    /// 啟用單一 guidebook；已滿額時回傳 PlanLimitReached
    pub fn activate_one(&self, user_id: &str, id: &str, limit: u32) -> Result<Guidebook> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing = owned_guidebook(&tx, user_id, id)?;

        if !existing.active {
            let active = count_active(&tx, user_id)?;
            if !plan::has_capacity(active, limit) {
                return Err(AppError::PlanLimitReached { limit });
            }
            ensure_slug(&tx, id)?;
            tx.execute("UPDATE guidebook SET active = 1 WHERE id = ?1", params![id])?;
        }

        let guidebook =
            load_guidebook(&tx, id)?.ok_or_else(|| AppError::not_found("Guidebook", id))?;
        tx.commit()?;
        Ok(guidebook)
    }

    pub fn deactivate_one(&self, user_id: &str, id: &str) -> Result<Guidebook> {
        let conn = self.lock();
        owned_guidebook(&conn, user_id, id)?;
        conn.execute("UPDATE guidebook SET active = 0 WHERE id = ?1", params![id])?;
        load_guidebook(&conn, id)?.ok_or_else(|| AppError::not_found("Guidebook", id))
    }

    // ---- maintenance ----

    /// 刪除從未發佈、未啟用且在 cutoff 之前最後修改的草稿，並清掉孤兒 host/property
    pub fn purge_stale_drafts(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM rule WHERE guidebook_id IN (
                SELECT id FROM guidebook
                WHERE active = 0 AND published_html IS NULL AND last_modified_time < ?1)",
            params![cutoff],
        )?;
        let guidebooks = tx.execute(
            "DELETE FROM guidebook
             WHERE active = 0 AND published_html IS NULL AND last_modified_time < ?1",
            params![cutoff],
        )?;
        let hosts = tx.execute(
            "DELETE FROM host WHERE id NOT IN (SELECT host_id FROM guidebook)",
            [],
        )?;
        let properties = tx.execute(
            "DELETE FROM property WHERE id NOT IN (SELECT property_id FROM guidebook)",
            [],
        )?;
        tx.commit()?;

        Ok(PurgeReport {
            guidebooks,
            hosts,
            properties,
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    for (table, column, declaration) in ADDED_COLUMNS {
        ensure_column(conn, table, column, declaration)?;
    }
    conn.execute_batch(INDEXES)?;
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, declaration: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if !existing.iter().any(|name| name == column) {
        tracing::info!("🛠️ Adding column {}.{}", table, column);
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, declaration
        ))?;
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn write_guidebook_content(
    conn: &Connection,
    id: &str,
    payload: &GuidebookPayload,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE guidebook SET
            check_in_time = ?2, check_out_time = ?3, access_info = ?4, wifi_network = ?5,
            wifi_password = ?6, welcome_message = ?7, parking_info = ?8,
            cover_image_url = COALESCE(?9, cover_image_url),
            safety_info = ?10, things_to_do = ?11, places_to_eat = ?12, checkout_info = ?13,
            house_manual = ?14, included_tabs = ?15, custom_sections = ?16,
            custom_tabs_meta = ?17, last_modified_time = ?18
         WHERE id = ?1",
        params![
            id,
            payload.check_in_time,
            payload.check_out_time,
            payload.access_info,
            payload.wifi_network,
            payload.wifi_password,
            payload.welcome_message,
            payload.parking_info,
            payload.cover_image_url,
            to_json(&payload.safety_info)?,
            to_json(&payload.things_to_do)?,
            to_json(&payload.places_to_eat)?,
            to_json(&payload.checkout_info)?,
            to_json(&payload.house_manual)?,
            to_json(&payload.included_tabs)?,
            to_json(&payload.custom_sections)?,
            to_json(&payload.custom_tabs_meta)?,
            now,
        ],
    )?;
    Ok(())
}

fn replace_rules(conn: &Connection, guidebook_id: &str, rules: &[String]) -> Result<()> {
    conn.execute("DELETE FROM rule WHERE guidebook_id = ?1", params![guidebook_id])?;
    let mut stmt =
        conn.prepare("INSERT INTO rule (guidebook_id, position, text) VALUES (?1, ?2, ?3)")?;
    for (position, text) in rules.iter().enumerate() {
        stmt.execute(params![guidebook_id, position as i64, text])?;
    }
    Ok(())
}

fn load_rules(conn: &Connection, guidebook_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT text FROM rule WHERE guidebook_id = ?1 ORDER BY position, id")?;
    let rules = stmt
        .query_map(params![guidebook_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rules)
}

fn row_to_guidebook(row: &Row<'_>) -> rusqlite::Result<Guidebook> {
    let safety_info: SafetyInfo = json_column(row, 12)?;
    Ok(Guidebook {
        id: row.get(0)?,
        user_id: row.get(1)?,
        host_id: row.get(2)?,
        property_id: row.get(3)?,
        check_in_time: row.get(4)?,
        check_out_time: row.get(5)?,
        access_info: row.get(6)?,
        wifi_network: row.get(7)?,
        wifi_password: row.get(8)?,
        welcome_message: row.get(9)?,
        parking_info: row.get(10)?,
        cover_image_url: row.get(11)?,
        safety_info,
        rules: Vec::new(),
        things_to_do: json_column(row, 13)?,
        places_to_eat: json_column(row, 14)?,
        checkout_info: json_column(row, 15)?,
        house_manual: json_column(row, 16)?,
        included_tabs: json_column(row, 17)?,
        custom_sections: json_column(row, 18)?,
        custom_tabs_meta: json_column(row, 19)?,
        template_key: row.get(20)?,
        active: row.get(21)?,
        public_slug: row.get(22)?,
        published_html: row.get(23)?,
        published_at: row.get(24)?,
        created_time: row.get(25)?,
        last_modified_time: row.get(26)?,
    })
}

fn load_guidebook(conn: &Connection, id: &str) -> Result<Option<Guidebook>> {
    let sql = format!("SELECT {} FROM guidebook g WHERE g.id = ?1", GUIDEBOOK_COLUMNS);
    let guidebook = conn
        .query_row(&sql, params![id], row_to_guidebook)
        .optional()?;

    match guidebook {
        Some(mut guidebook) => {
            guidebook.rules = load_rules(conn, id)?;
            Ok(Some(guidebook))
        }
        None => Ok(None),
    }
}

/// 不屬於該使用者的 guidebook 一律回報 not found
fn owned_guidebook(conn: &Connection, user_id: &str, id: &str) -> Result<Guidebook> {
    match load_guidebook(conn, id)? {
        Some(guidebook) if guidebook.user_id == user_id => Ok(guidebook),
        _ => Err(AppError::not_found("Guidebook", id)),
    }
}

fn attach_relations(conn: &Connection, guidebook: Guidebook) -> Result<GuidebookRecord> {
    let host = conn.query_row(
        "SELECT id, user_id, name, bio, contact, photo_url FROM host WHERE id = ?1",
        params![guidebook.host_id],
        |row| {
            Ok(Host {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                bio: row.get(3)?,
                contact: row.get(4)?,
                photo_url: row.get(5)?,
            })
        },
    )?;
    let property = conn.query_row(
        "SELECT id, user_id, name, address_street, address_city_state, address_zip, location
         FROM property WHERE id = ?1",
        params![guidebook.property_id],
        |row| {
            Ok(Property {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                address_street: row.get(3)?,
                address_city_state: row.get(4)?,
                address_zip: row.get(5)?,
                location: row.get(6)?,
            })
        },
    )?;

    Ok(GuidebookRecord {
        guidebook,
        host,
        property,
    })
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let plan: String = row.get(2)?;
    Ok(Profile {
        user_id: row.get(0)?,
        email: row.get(1)?,
        plan: Plan::from_name(&plan),
        guidebook_limit: row.get(3)?,
        extra_slots: row.get(4)?,
        stripe_customer_id: row.get(5)?,
        stripe_subscription_id: row.get(6)?,
        subscription_status: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>> {
    let sql = format!("SELECT {} FROM profiles WHERE user_id = ?1", PROFILE_COLUMNS);
    Ok(conn
        .query_row(&sql, params![user_id], row_to_profile)
        .optional()?)
}

fn addon_slots(conn: &Connection, user_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM addon_subscription WHERE user_id = ?1 AND ended = 0",
        params![user_id],
        |row| row.get(0),
    )?)
}

fn count_active(conn: &Connection, user_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM guidebook WHERE user_id = ?1 AND active = 1",
        params![user_id],
        |row| row.get(0),
    )?)
}

fn slot_candidates(tx: &Transaction<'_>, user_id: &str) -> Result<Vec<SlotCandidate>> {
    let mut stmt = tx.prepare(
        "SELECT id, active, last_modified_time, created_time FROM guidebook WHERE user_id = ?1",
    )?;
    let candidates = stmt
        .query_map(params![user_id], |row| {
            Ok(SlotCandidate {
                id: row.get(0)?,
                active: row.get(1)?,
                last_modified_time: row.get(2)?,
                created_time: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

/// 啟用前確保有 public_slug；停用時保留 slug 以便重新啟用沿用同一網址
fn ensure_slug(conn: &Connection, id: &str) -> Result<String> {
    let (existing, property_name): (Option<String>, Option<String>) = conn.query_row(
        "SELECT g.public_slug, p.name FROM guidebook g
         LEFT JOIN property p ON p.id = g.property_id
         WHERE g.id = ?1",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if let Some(slug) = existing {
        return Ok(slug);
    }

    let base = slugify(property_name.as_deref().unwrap_or_default());
    for _ in 0..5 {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let candidate = format!("{}-{}", base, &suffix[..6]);
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM guidebook WHERE public_slug = ?1)",
            params![candidate],
            |row| row.get(0),
        )?;
        if !taken {
            conn.execute(
                "UPDATE guidebook SET public_slug = ?2 WHERE id = ?1",
                params![id, candidate],
            )?;
            return Ok(candidate);
        }
    }

    Err(AppError::ProcessingError {
        message: format!("Could not allocate a unique slug for guidebook {}", id),
    })
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "guidebook".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::RecommendationItem;
    use std::time::Duration;

    fn payload(name: &str) -> GuidebookPayload {
        GuidebookPayload {
            property_name: Some(name.to_string()),
            host_name: Some("John Doe".to_string()),
            check_in_time: Some("3:00 PM".to_string()),
            rules: vec!["No smoking".to_string(), "No pets".to_string()],
            things_to_do: vec![RecommendationItem {
                name: "Tower Bridge".into(),
                description: "Walk across".into(),
                address: "Tower Bridge Rd, London".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn pause() {
        std::thread::sleep(Duration::from_millis(3));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Sunny Side!"), "the-sunny-side");
        assert_eq!(slugify("  ---  "), "guidebook");
        assert_eq!(slugify("Café  Ünïcode"), "caf-n-code");
        assert!(slugify(&"a".repeat(100)).len() <= 40);
    }

    #[test]
    fn test_migrate_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let mut stmt = conn.prepare("PRAGMA table_info(guidebook)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(columns.contains(&"public_slug".to_string()));
        assert!(columns.contains(&"custom_tabs_meta".to_string()));
    }

    #[test]
    fn test_create_and_load_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create_guidebook("user-1", &payload("Sunny Side")).unwrap();

        assert!(!created.active);
        assert_eq!(created.template_key, DEFAULT_TEMPLATE_KEY);
        assert_eq!(created.rules, vec!["No smoking", "No pets"]);
        assert_eq!(created.things_to_do[0].name, "Tower Bridge");

        let record = store.load_record(&created.id).unwrap().unwrap();
        assert_eq!(record.host.name, "John Doe");
        assert_eq!(record.property.name, "Sunny Side");
    }

    #[test]
    fn test_other_users_cannot_touch_guidebook() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create_guidebook("owner", &payload("Cabin")).unwrap();

        assert!(matches!(
            store.get_owned("intruder", &created.id),
            Err(AppError::NotFound { .. })
        ));
        assert!(store.delete_guidebook("intruder", &created.id).is_err());
        assert!(store.get_guidebook(&created.id).unwrap().is_some());
    }

    #[test]
    fn test_update_replaces_rules_and_clears_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create_guidebook("user-1", &payload("Cabin")).unwrap();
        store.store_snapshot(&created.id, "<html></html>").unwrap();

        let mut changed = payload("Cabin Deluxe");
        changed.rules = vec!["Quiet after 10 PM".to_string()];
        let updated = store.update_guidebook("user-1", &created.id, &changed).unwrap();

        assert_eq!(updated.rules, vec!["Quiet after 10 PM"]);
        assert!(updated.published_html.is_none());
        assert!(updated.last_modified_time >= created.last_modified_time);
    }

    #[test]
    fn test_reconcile_respects_limit_and_assigns_slugs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.create_guidebook("user-1", &payload("First")).unwrap();
        pause();
        let second = store.create_guidebook("user-1", &payload("Second")).unwrap();
        pause();
        let third = store.create_guidebook("user-1", &payload("Third")).unwrap();

        let report = store.reconcile_active("user-1", 2).unwrap();
        assert_eq!(report.active_count, 2);
        assert_eq!(report.activated, vec![third.id.clone(), second.id.clone()]);

        let third = store.get_guidebook(&third.id).unwrap().unwrap();
        assert!(third.active);
        assert!(third.public_slug.as_deref().unwrap().starts_with("third-"));
        assert!(!store.get_guidebook(&first.id).unwrap().unwrap().active);

        let downgrade = store.reconcile_active("user-1", 0).unwrap();
        assert_eq!(downgrade.active_count, 0);
        assert_eq!(downgrade.deactivated.len(), 2);
    }

    #[test]
    fn test_activate_one_enforces_capacity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.create_guidebook("user-1", &payload("A")).unwrap();
        let b = store.create_guidebook("user-1", &payload("B")).unwrap();

        assert!(store.activate_one("user-1", &a.id, 1).unwrap().active);
        // 已啟用的再啟用一次不佔額外名額
        assert!(store.activate_one("user-1", &a.id, 1).unwrap().active);
        assert!(matches!(
            store.activate_one("user-1", &b.id, 1),
            Err(AppError::PlanLimitReached { limit: 1 })
        ));

        let deactivated = store.deactivate_one("user-1", &a.id).unwrap();
        assert!(!deactivated.active);
        assert!(deactivated.public_slug.is_some());
        assert!(store.activate_one("user-1", &b.id, 1).unwrap().active);
    }

    #[test]
    fn test_profile_plan_changes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let profile = store.ensure_profile("user-1", Some("host@example.com")).unwrap();
        assert_eq!(profile.plan, Plan::Free);
        assert_eq!(profile.guidebook_limit, 0);

        let change = PlanChange {
            plan: Plan::Growth,
            extra_slots: 2,
            stripe_customer_id: Some("cus_123".into()),
            stripe_subscription_id: Some("sub_123".into()),
            subscription_status: Some("active".into()),
        };
        let profile = store.apply_plan_change("user-1", &change).unwrap();
        assert_eq!(profile.guidebook_limit, 5);

        let by_customer = store.find_profile_by_customer("cus_123").unwrap().unwrap();
        assert_eq!(by_customer.user_id, "user-1");
        assert_eq!(by_customer.email.as_deref(), Some("host@example.com"));
    }

    #[test]
    fn test_addon_subscriptions_sum_and_stay_ended() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.record_addon_subscription("user-1", "sub_a", 1, false).unwrap(), 1);
        // 同一訂閱重複送達不會重複計算
        assert_eq!(store.record_addon_subscription("user-1", "sub_a", 1, false).unwrap(), 1);
        assert_eq!(store.record_addon_subscription("user-1", "sub_b", 2, true).unwrap(), 3);
        assert_eq!(store.record_addon_subscription("user-1", "sub_b", 1, true).unwrap(), 2);

        assert_eq!(store.end_addon_subscription("user-1", "sub_a").unwrap(), 1);
        assert_eq!(store.record_addon_subscription("user-1", "sub_a", 1, true).unwrap(), 1);
        assert_eq!(store.record_addon_subscription("user-1", "sub_a", 1, false).unwrap(), 1);
        assert_eq!(store.addon_slots("user-2").unwrap(), 0);

        let total = store
            .replace_addon_subscriptions("user-1", &[("sub_c".to_string(), 4)])
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(store.addon_slots("user-1").unwrap(), 4);
    }

    #[test]
    fn test_purge_stale_drafts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let draft = store.create_guidebook("user-1", &payload("Draft")).unwrap();
        let published = store.create_guidebook("user-1", &payload("Published")).unwrap();
        store.store_snapshot(&published.id, "<html></html>").unwrap();

        let report = store
            .purge_stale_drafts(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(report.guidebooks, 1);
        assert_eq!(report.hosts, 1);
        assert_eq!(report.properties, 1);
        assert!(store.get_guidebook(&draft.id).unwrap().is_none());
        assert!(store.get_guidebook(&published.id).unwrap().is_some());
    }
}
