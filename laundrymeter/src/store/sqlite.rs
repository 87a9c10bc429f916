//! SQLite backend for [`SampleStore`] and [`UserStore`].

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;

use super::{Result, SampleStore, StoreError, UserStore};
use crate::machine::Sample;
use crate::tracing::prelude::*;
use crate::user::{Channel, User, UserIdentity};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS samples (
        timestamp_ms INTEGER PRIMARY KEY,
        running INTEGER NOT NULL,
        last_changed_ms INTEGER,
        voltage REAL NOT NULL,
        current REAL NOT NULL,
        power REAL NOT NULL,
        total_energy REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        identity TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        wants_email INTEGER NOT NULL DEFAULT 0,
        wants_chat INTEGER NOT NULL DEFAULT 0,
        chat_address TEXT UNIQUE,
        auth_token TEXT UNIQUE,
        chat_token TEXT UNIQUE,
        email_revision INTEGER NOT NULL DEFAULT 0,
        chat_revision INTEGER NOT NULL DEFAULT 0
    );
"#;

const USER_COLUMNS: &str = "identity, name, email, wants_email, wants_chat, chat_address, \
    email_revision, chat_revision";

/// A single SQLite connection shared by the poller, API and bot.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_user(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
        let conn = self.conn.lock();
        let user = conn
            .query_row(&sql, params![value], row_to_user)
            .optional()?;
        Ok(user)
    }
}

fn to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| StoreError::InvalidTimestamp(ms))
}

fn flag_column(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "wants_email",
        Channel::Chat => "wants_chat",
    }
}

fn revision_column(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email_revision",
        Channel::Chat => "chat_revision",
    }
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let email_revision: i64 = row.get(6)?;
    let chat_revision: i64 = row.get(7)?;
    Ok(User {
        identity: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        wants_email: row.get(3)?,
        wants_chat: row.get(4)?,
        chat_address: row.get(5)?,
        email_revision: email_revision.max(0) as u64,
        chat_revision: chat_revision.max(0) as u64,
    })
}

/// Sample columns as stored, before timestamp conversion.
struct SampleRow {
    timestamp_ms: i64,
    running: bool,
    last_changed_ms: Option<i64>,
    voltage: f64,
    current: f64,
    power: f64,
    total_energy: f64,
}

impl SampleRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp_ms: row.get(0)?,
            running: row.get(1)?,
            last_changed_ms: row.get(2)?,
            voltage: row.get(3)?,
            current: row.get(4)?,
            power: row.get(5)?,
            total_energy: row.get(6)?,
        })
    }

    fn into_sample(self) -> Result<Sample> {
        Ok(Sample {
            timestamp: from_millis(self.timestamp_ms)?,
            running: self.running,
            last_changed: self.last_changed_ms.map(from_millis).transpose()?,
            voltage: self.voltage,
            current: self.current,
            power: self.power,
            total_energy: self.total_energy,
        })
    }
}

const SAMPLE_COLUMNS: &str =
    "timestamp_ms, running, last_changed_ms, voltage, current, power, total_energy";

impl SampleStore for SqliteStore {
    fn append(&self, sample: &Sample) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO samples
                 (timestamp_ms, running, last_changed_ms, voltage, current, power, total_energy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_millis(sample.timestamp),
                sample.running,
                sample.last_changed.map(to_millis),
                sample.voltage,
                sample.current,
                sample.power,
                sample.total_energy,
            ],
        )?;
        Ok(())
    }

    fn latest(&self) -> Result<Option<Sample>> {
        let sql =
            format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY timestamp_ms DESC LIMIT 1");
        let row = {
            let conn = self.conn.lock();
            conn.query_row(&sql, [], SampleRow::read).optional()?
        };
        row.map(SampleRow::into_sample).transpose()
    }

    fn range(&self, limit: usize) -> Result<Vec<Sample>> {
        let sql =
            format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY timestamp_ms DESC LIMIT ?1");
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(params![limit], SampleRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter().map(SampleRow::into_sample).collect()
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn delete_oldest(&self, n: u64) -> Result<u64> {
        let conn = self.conn.lock();
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        let deleted = conn.execute(
            "DELETE FROM samples WHERE timestamp_ms IN
                (SELECT timestamp_ms FROM samples ORDER BY timestamp_ms ASC LIMIT ?1)",
            params![n],
        )?;
        Ok(deleted as u64)
    }

    fn delete_all(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM samples", [])?;
        Ok(deleted as u64)
    }
}

impl UserStore for SqliteStore {
    fn user(&self, identity: &str) -> Result<Option<User>> {
        self.query_user("identity", identity)
    }

    fn upsert_user(&self, identity: &UserIdentity) -> Result<User> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO users (identity, name, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(identity) DO UPDATE SET name = excluded.name, email = excluded.email",
                params![identity.username, identity.name, identity.email],
            )?;
        }
        self.user(&identity.username)?
            .ok_or_else(|| StoreError::UserNotFound(identity.username.clone()))
    }

    fn user_by_auth_token(&self, token: &str) -> Result<Option<User>> {
        self.query_user("auth_token", token)
    }

    fn user_by_chat_address(&self, address: &str) -> Result<Option<User>> {
        self.query_user("chat_address", address)
    }

    fn set_auth_token(&self, identity: &str, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET auth_token = ?1 WHERE identity = ?2",
            params![token, identity],
        )?;
        if updated == 0 {
            return Err(StoreError::UserNotFound(identity.to_string()));
        }
        Ok(())
    }

    fn set_chat_token(&self, identity: &str, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET chat_token = ?1 WHERE identity = ?2",
            params![token, identity],
        )?;
        if updated == 0 {
            return Err(StoreError::UserNotFound(identity.to_string()));
        }
        Ok(())
    }

    fn bind_chat_address(&self, token: &str, address: &str) -> Result<Option<User>> {
        let identity = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            let owner: Option<String> = tx
                .query_row(
                    "SELECT identity FROM users WHERE chat_token = ?1",
                    params![token],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner) = owner else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE users SET chat_address = NULL, wants_chat = 0,
                     chat_revision = chat_revision + 1
                 WHERE chat_address = ?1 AND identity != ?2",
                params![address, owner],
            )?;
            tx.execute(
                "UPDATE users SET chat_address = ?1, chat_token = NULL,
                     chat_revision = chat_revision + 1
                 WHERE identity = ?2",
                params![address, owner],
            )?;
            tx.commit()?;
            owner
        };
        self.user(&identity)
    }

    fn set_preference(&self, identity: &str, channel: Channel, enabled: bool) -> Result<User> {
        let flag = flag_column(channel);
        let revision = revision_column(channel);
        // Enabling chat and checking for a bound address is one statement,
        // so a concurrent rebind cannot leave an unreachable subscriber.
        let guard = if channel == Channel::Chat && enabled {
            " AND chat_address IS NOT NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE users SET {flag} = ?1, {revision} = {revision} + 1 \
             WHERE identity = ?2{guard}"
        );
        {
            let conn = self.conn.lock();
            let updated = conn.execute(&sql, params![enabled, identity])?;
            if updated == 0 {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM users WHERE identity = ?1",
                        params![identity],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                return Err(if exists {
                    StoreError::ChatNotRegistered(identity.to_string())
                } else {
                    StoreError::UserNotFound(identity.to_string())
                });
            }
        }
        self.user(identity)?
            .ok_or_else(|| StoreError::UserNotFound(identity.to_string()))
    }

    fn subscribers(&self, channel: Channel) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = 1 ORDER BY identity",
            flag_column(channel)
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn consume_subscription(
        &self,
        identity: &str,
        channel: Channel,
        revision: u64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE users SET {} = 0 WHERE identity = ?1 AND {} = ?2",
            flag_column(channel),
            revision_column(channel)
        );
        let conn = self.conn.lock();
        let revision = i64::try_from(revision).unwrap_or(i64::MAX);
        let updated = conn.execute(&sql, params![identity, revision])?;
        Ok(updated == 1)
    }
}
