/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collaborators::{ActivityStamp, IdentityKey};
use crate::ref_store::{BucketKey, EntryPosition, RefEntry, RefListStore, UpsertOutcome};
use crate::stream_type::{ListKey, StreamType};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
pub struct SqliteRefStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteRefStore {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let store = Self {
            path: db_path.as_ref().to_path_buf(),
            busy_timeout,
        };
        let conn = store.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS ref_lists (
              owner_key TEXT NOT NULL,
              stream TEXT NOT NULL,
              stream_rank INTEGER NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(owner_key, stream)
            );
            CREATE TABLE IF NOT EXISTS activity_refs (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              owner_key TEXT NOT NULL,
              stream TEXT NOT NULL,
              activity_id TEXT NOT NULL,
              bucket INTEGER NOT NULL,
              created_at_ms INTEGER NOT NULL,
              last_updated_ms INTEGER NOT NULL,
              UNIQUE(owner_key, stream, activity_id)
            );
            CREATE INDEX IF NOT EXISTS idx_ref_lists_order ON ref_lists(owner_key, stream_rank);
            CREATE INDEX IF NOT EXISTS idx_activity_refs_walk
              ON activity_refs(owner_key, stream, bucket DESC, created_at_ms DESC, seq DESC);
            "#,
        )
        .with_context(|| format!("init ref store: {}", store.path.display()))?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open ref store: {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

fn parse_stream(s: &str) -> rusqlite::Result<StreamType> {
    StreamType::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown stream type: {s}").into(),
        )
    })
}

/// Matches the declaration order of `StreamType`, which is its `Ord`.
fn stream_rank(stream: StreamType) -> i64 {
    stream as i64
}

fn row_to_entry(list: &ListKey, r: &rusqlite::Row<'_>) -> rusqlite::Result<RefEntry> {
    Ok(RefEntry {
        owner: list.owner.clone(),
        stream: list.stream,
        activity_id: r.get(0)?,
        last_updated_ms: r.get(1)?,
        position: EntryPosition {
            bucket: BucketKey(r.get(2)?),
            created_at_ms: r.get(3)?,
            seq: r.get(4)?,
        },
    })
}

impl RefListStore for SqliteRefStore {
    fn upsert(&self, list: &ListKey, stamp: &ActivityStamp) -> Result<UpsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let owner = list.owner.as_str();
        let stream = list.stream.as_str();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT last_updated_ms FROM activity_refs WHERE owner_key=?1 AND stream=?2 AND activity_id=?3",
                params![owner, stream, stamp.id],
                |r| r.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(v) if v == stamp.last_updated_ms => UpsertOutcome::Unchanged,
            Some(_) => {
                tx.execute(
                    "UPDATE activity_refs SET last_updated_ms=?4 WHERE owner_key=?1 AND stream=?2 AND activity_id=?3",
                    params![owner, stream, stamp.id, stamp.last_updated_ms],
                )?;
                UpsertOutcome::Refreshed
            }
            None => {
                tx.execute(
                    "INSERT OR IGNORE INTO ref_lists(owner_key, stream, stream_rank, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
                    params![owner, stream, stream_rank(list.stream), now_ms()],
                )?;
                tx.execute(
                    r#"
                    INSERT INTO activity_refs(owner_key, stream, activity_id, bucket, created_at_ms, last_updated_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        owner,
                        stream,
                        stamp.id,
                        BucketKey::from_unix_ms(stamp.created_at_ms).0,
                        stamp.created_at_ms,
                        stamp.last_updated_ms
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn remove(&self, list: &ListKey, activity_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM activity_refs WHERE owner_key=?1 AND stream=?2 AND activity_id=?3",
            params![list.owner.as_str(), list.stream.as_str(), activity_id],
        )?;
        Ok(n > 0)
    }

    fn prune(&self, entry: &RefEntry) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM activity_refs WHERE owner_key=?1 AND stream=?2 AND activity_id=?3 AND seq=?4",
            params![
                entry.owner.as_str(),
                entry.stream.as_str(),
                entry.activity_id,
                entry.position.seq
            ],
        )?;
        Ok(n > 0)
    }

    fn get(&self, list: &ListKey, activity_id: &str) -> Result<Option<RefEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT activity_id, last_updated_ms, bucket, created_at_ms, seq
            FROM activity_refs
            WHERE owner_key=?1 AND stream=?2 AND activity_id=?3
            "#,
            params![list.owner.as_str(), list.stream.as_str(), activity_id],
            |r| row_to_entry(list, r),
        )
        .optional()
        .map_err(Into::into)
    }

    fn scan(&self, list: &ListKey, after: Option<EntryPosition>, limit: usize) -> Result<Vec<RefEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let limit = limit.min(i64::MAX as usize) as i64;
        let owner = list.owner.as_str();
        let stream = list.stream.as_str();
        let (sql, params_vec): (&str, Vec<rusqlite::types::Value>) = if let Some(c) = after {
            (
                r#"
                SELECT activity_id, last_updated_ms, bucket, created_at_ms, seq
                FROM activity_refs
                WHERE owner_key=?1 AND stream=?2 AND (bucket, created_at_ms, seq) < (?3, ?4, ?5)
                ORDER BY bucket DESC, created_at_ms DESC, seq DESC
                LIMIT ?6
                "#,
                vec![
                    owner.to_string().into(),
                    stream.to_string().into(),
                    c.bucket.0.into(),
                    c.created_at_ms.into(),
                    c.seq.into(),
                    limit.into(),
                ],
            )
        } else {
            (
                r#"
                SELECT activity_id, last_updated_ms, bucket, created_at_ms, seq
                FROM activity_refs
                WHERE owner_key=?1 AND stream=?2
                ORDER BY bucket DESC, created_at_ms DESC, seq DESC
                LIMIT ?3
                "#,
                vec![owner.to_string().into(), stream.to_string().into(), limit.into()],
            )
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec), |r| row_to_entry(list, r))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn count(&self, list: &ListKey) -> Result<u64> {
        let conn = self.conn()?;
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM activity_refs WHERE owner_key=?1 AND stream=?2",
            params![list.owner.as_str(), list.stream.as_str()],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    fn lists(&self, after: Option<&ListKey>, limit: usize) -> Result<Vec<ListKey>> {
        let conn = self.conn()?;
        let limit = limit.min(i64::MAX as usize) as i64;
        let map = |r: &rusqlite::Row<'_>| -> rusqlite::Result<ListKey> {
            let owner: String = r.get(0)?;
            let stream: String = r.get(1)?;
            Ok(ListKey {
                owner: IdentityKey(owner),
                stream: parse_stream(&stream)?,
            })
        };
        let (sql, params_vec): (&str, Vec<rusqlite::types::Value>) = if let Some(a) = after {
            (
                r#"
                SELECT owner_key, stream FROM ref_lists
                WHERE (owner_key, stream_rank) > (?1, ?2)
                ORDER BY owner_key ASC, stream_rank ASC
                LIMIT ?3
                "#,
                vec![
                    a.owner.as_str().to_string().into(),
                    stream_rank(a.stream).into(),
                    limit.into(),
                ],
            )
        } else {
            (
                "SELECT owner_key, stream FROM ref_lists ORDER BY owner_key ASC, stream_rank ASC LIMIT ?1",
                vec![limit.into()],
            )
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
