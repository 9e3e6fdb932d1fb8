/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collaborators::{
    ActivityContentStore, ActivityStamp, ConnectionGraph, IdentityDirectory, IdentityKey, IdentityRef, SpaceRoster,
};
use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite home of identities, activity records, the connection graph and
/// space rosters.
#[derive(Clone)]
pub struct SocialDb {
    path: PathBuf,
    busy_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub stamp: ActivityStamp,
    /// `None` once the author's identity was deleted.
    pub owner: Option<IdentityRef>,
    /// The space the activity was posted into, if it still resolves.
    pub space: Option<IdentityRef>,
    pub in_space: bool,
    pub body_json: String,
}

/// Identity whose lists an activity was fanned out from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOrigin<'a> {
    Author(&'a IdentityRef),
    Space(&'a IdentityRef),
}

impl ActivityRow {
    /// `None` when the identity holding the activity's lists is gone.
    pub fn origin(&self) -> Option<ActivityOrigin<'_>> {
        if self.in_space {
            self.space.as_ref().map(ActivityOrigin::Space)
        } else {
            self.owner.as_ref().map(ActivityOrigin::Author)
        }
    }
}

impl SocialDb {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db = Self {
            path: db_path.as_ref().to_path_buf(),
            busy_timeout,
        };
        let conn = db.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS identities (
              identity_key TEXT PRIMARY KEY,
              provider TEXT NOT NULL,
              remote_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(provider, remote_id)
            );

            CREATE TABLE IF NOT EXISTS activities (
              activity_id TEXT PRIMARY KEY,
              owner_key TEXT NOT NULL,
              space_key TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              last_updated_ms INTEGER NOT NULL,
              body_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activities_owner ON activities(owner_key, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS connections (
              a_key TEXT NOT NULL,
              b_key TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(a_key, b_key)
            );
            CREATE INDEX IF NOT EXISTS idx_connections_b ON connections(b_key);

            CREATE TABLE IF NOT EXISTS space_members (
              space_key TEXT NOT NULL,
              member_key TEXT NOT NULL,
              role TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(space_key, member_key)
            );
            "#,
        )
        .with_context(|| format!("init social db: {}", db.path.display()))?;
        Ok(db)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).with_context(|| format!("open db: {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Returns the key of `identity`, registering it on first sight.
    pub fn upsert_identity(&self, identity: &IdentityRef) -> Result<IdentityKey> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO identities(identity_key, provider, remote_id, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![new_key("id"), identity.provider, identity.remote_id, now_ms()],
        )?;
        let key: String = conn.query_row(
            "SELECT identity_key FROM identities WHERE provider=?1 AND remote_id=?2",
            params![identity.provider, identity.remote_id],
            |r| r.get(0),
        )?;
        Ok(IdentityKey(key))
    }

    pub fn find_identity(&self, identity: &IdentityRef) -> Result<Option<IdentityKey>> {
        let conn = self.conn()?;
        let key: Option<String> = conn
            .query_row(
                "SELECT identity_key FROM identities WHERE provider=?1 AND remote_id=?2",
                params![identity.provider, identity.remote_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(key.map(IdentityKey))
    }

    /// Forgets the identity together with its edges and memberships.
    /// Activities it authored stay until deleted.
    pub fn delete_identity(&self, identity: &IdentityRef) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let key: Option<String> = tx
            .query_row(
                "SELECT identity_key FROM identities WHERE provider=?1 AND remote_id=?2",
                params![identity.provider, identity.remote_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(key) = key else {
            return Ok(false);
        };
        tx.execute("DELETE FROM connections WHERE a_key=?1 OR b_key=?1", params![key])?;
        tx.execute(
            "DELETE FROM space_members WHERE space_key=?1 OR member_key=?1",
            params![key],
        )?;
        tx.execute("DELETE FROM identities WHERE identity_key=?1", params![key])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn new_activity_id(&self) -> String {
        new_key("act")
    }

    /// Stores an activity record. `created_at_ms` defaults to now; a
    /// back-dated value is kept as given.
    pub fn store_activity(
        &self,
        owner: &IdentityKey,
        space: Option<&IdentityKey>,
        activity_id: Option<&str>,
        created_at_ms: Option<i64>,
        body_json: &str,
    ) -> Result<ActivityStamp> {
        let id = match activity_id {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => self.new_activity_id(),
        };
        let created = created_at_ms.unwrap_or_else(now_ms);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO activities(activity_id, owner_key, space_key, created_at_ms, last_updated_ms, body_json)
            VALUES (?1, ?2, ?3, ?4, ?4, ?5)
            "#,
            params![id, owner.as_str(), space.map(IdentityKey::as_str), created, body_json],
        )
        .with_context(|| format!("store activity {id}"))?;
        Ok(ActivityStamp {
            id,
            created_at_ms: created,
            last_updated_ms: created,
        })
    }

    /// Replaces the body and advances `last_updated_ms` strictly.
    pub fn update_activity(&self, activity_id: &str, body_json: &str) -> Result<Option<ActivityStamp>> {
        let conn = self.conn()?;
        let n = conn.execute(
            r#"
            UPDATE activities
            SET body_json=?2,
                last_updated_ms=(CASE WHEN ?3 > last_updated_ms THEN ?3 ELSE last_updated_ms + 1 END)
            WHERE activity_id=?1
            "#,
            params![activity_id, body_json, now_ms()],
        )?;
        if n == 0 {
            return Ok(None);
        }
        stamp_of(&conn, activity_id)
    }

    pub fn delete_activity(&self, activity_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM activities WHERE activity_id=?1", params![activity_id])?;
        Ok(n > 0)
    }

    pub fn get_activity(&self, activity_id: &str) -> Result<Option<ActivityRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT a.activity_id, a.created_at_ms, a.last_updated_ms, a.body_json,
                       i.provider, i.remote_id, s.provider, s.remote_id, a.space_key
                FROM activities a
                LEFT JOIN identities i ON i.identity_key = a.owner_key
                LEFT JOIN identities s ON s.identity_key = a.space_key
                WHERE a.activity_id=?1
                "#,
                params![activity_id],
                |r| {
                    Ok(ActivityRow {
                        stamp: ActivityStamp {
                            id: r.get(0)?,
                            created_at_ms: r.get(1)?,
                            last_updated_ms: r.get(2)?,
                        },
                        body_json: r.get(3)?,
                        owner: match (r.get::<_, Option<String>>(4)?, r.get::<_, Option<String>>(5)?) {
                            (Some(p), Some(id)) => Some(IdentityRef::new(p, id)),
                            _ => None,
                        },
                        space: match (r.get::<_, Option<String>>(6)?, r.get::<_, Option<String>>(7)?) {
                            (Some(p), Some(id)) => Some(IdentityRef::new(p, id)),
                            _ => None,
                        },
                        in_space: r.get::<_, Option<String>>(8)?.is_some(),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Records a symmetric edge. Returns false when it already existed.
    pub fn add_connection(&self, a: &IdentityKey, b: &IdentityKey) -> Result<bool> {
        let (lo, hi) = ordered(a, b);
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO connections(a_key, b_key, created_at_ms) VALUES (?1, ?2, ?3)",
            params![lo, hi, now_ms()],
        )?;
        Ok(n > 0)
    }

    pub fn remove_connection(&self, a: &IdentityKey, b: &IdentityKey) -> Result<bool> {
        let (lo, hi) = ordered(a, b);
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM connections WHERE a_key=?1 AND b_key=?2",
            params![lo, hi],
        )?;
        Ok(n > 0)
    }

    pub fn add_space_member(&self, space: &IdentityKey, member: &IdentityKey, role: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            r#"
            INSERT INTO space_members(space_key, member_key, role, created_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(space_key, member_key) DO UPDATE SET role=excluded.role
            WHERE space_members.role IS NOT excluded.role
            "#,
            params![space.as_str(), member.as_str(), role, now_ms()],
        )?;
        Ok(n > 0)
    }

    pub fn remove_space_member(&self, space: &IdentityKey, member: &IdentityKey) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM space_members WHERE space_key=?1 AND member_key=?2",
            params![space.as_str(), member.as_str()],
        )?;
        Ok(n > 0)
    }

    fn identities_of(&self, sql: &str, key: &str) -> Result<Vec<IdentityRef>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |r| {
            Ok(IdentityRef::new(r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

impl ActivityContentStore for SocialDb {
    fn exists(&self, activity_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM activities WHERE activity_id=?1",
                params![activity_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, activity_id: &str) -> Result<Option<ActivityStamp>> {
        let conn = self.conn()?;
        stamp_of(&conn, activity_id)
    }
}

impl ConnectionGraph for SocialDb {
    fn connections_of(&self, identity: &IdentityRef) -> Result<Vec<IdentityRef>> {
        let Some(key) = self.find_identity(identity)? else {
            return Ok(Vec::new());
        };
        self.identities_of(
            r#"
            SELECT i.provider, i.remote_id
            FROM connections c
            JOIN identities i
              ON i.identity_key = (CASE WHEN c.a_key = ?1 THEN c.b_key ELSE c.a_key END)
            WHERE c.a_key = ?1 OR c.b_key = ?1
            ORDER BY c.created_at_ms ASC, i.identity_key ASC
            "#,
            key.as_str(),
        )
    }
}

impl SpaceRoster for SocialDb {
    fn members_of(&self, space: &IdentityRef) -> Result<Vec<IdentityRef>> {
        let Some(key) = self.find_identity(space)? else {
            return Ok(Vec::new());
        };
        self.identities_of(
            r#"
            SELECT i.provider, i.remote_id
            FROM space_members m
            JOIN identities i ON i.identity_key = m.member_key
            WHERE m.space_key = ?1
            ORDER BY m.created_at_ms ASC, i.identity_key ASC
            "#,
            key.as_str(),
        )
    }
}

impl IdentityDirectory for SocialDb {
    fn resolve(&self, identity: &IdentityRef) -> Result<Option<IdentityKey>> {
        self.find_identity(identity)
    }
}

fn stamp_of(conn: &Connection, activity_id: &str) -> Result<Option<ActivityStamp>> {
    let stamp = conn
        .query_row(
            "SELECT activity_id, created_at_ms, last_updated_ms FROM activities WHERE activity_id=?1",
            params![activity_id],
            |r| {
                Ok(ActivityStamp {
                    id: r.get(0)?,
                    created_at_ms: r.get(1)?,
                    last_updated_ms: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(stamp)
}

fn ordered<'a>(a: &'a IdentityKey, b: &'a IdentityKey) -> (&'a str, &'a str) {
    if a <= b {
        (a.as_str(), b.as_str())
    } else {
        (b.as_str(), a.as_str())
    }
}

fn random_hex() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}

fn new_key(prefix: &str) -> String {
    format!("{prefix}-{}", random_hex())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
