//! SQLite-backed event store.

use super::EventStore;
use crate::error::{Error, Result};
use crate::record::{Filter, Record, Tag};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id          TEXT PRIMARY KEY,
    pubkey      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    kind        INTEGER NOT NULL,
    tags        TEXT NOT NULL,
    content     TEXT NOT NULL,
    sig         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS records_pubkey ON records(pubkey);
CREATE INDEX IF NOT EXISTS records_kind_created ON records(kind, created_at);
";

/// Event store persisted in a single SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Event store journal mode: {mode}");
        info!("Opened event store at {}", path.display());
        Self::init(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| Error::Storage(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn save(&self, record: &Record) -> Result<bool> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let tags = serde_json::to_string(&record.tags)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO records (id, pubkey, created_at, kind, tags, content, sig)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.pubkey,
                    record.created_at,
                    record.kind,
                    tags,
                    record.content,
                    record.sig
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Record>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let (sql, values) = select_sql(&filter);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, pubkey, created_at, kind, tags, content, sig) = row?;
                let tags: Vec<Tag> = serde_json::from_str(&tags)?;
                let record = Record {
                    id,
                    pubkey,
                    created_at,
                    kind,
                    tags,
                    content,
                    sig,
                };
                // Tag constraints are checked here rather than in SQL.
                if filter.matches(&record) {
                    records.push(record);
                    if filter.limit.is_some_and(|limit| records.len() >= limit) {
                        break;
                    }
                }
            }
            Ok(records)
        })
        .await
    }

    async fn count_by_author(&self, author: &str) -> Result<u64> {
        let author = author.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE pubkey = ?1",
                params![author],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }
}

/// Build the SELECT for every constraint SQL can express directly.
fn select_sql(filter: &Filter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    let mut any_of = |column: &str, items: Vec<Value>| {
        let marks = vec!["?"; items.len()].join(", ");
        clauses.push(format!("{column} IN ({marks})"));
        values.extend(items);
    };
    if let Some(ids) = &filter.ids {
        any_of("id", ids.iter().cloned().map(Value::Text).collect());
    }
    if let Some(authors) = &filter.authors {
        any_of("pubkey", authors.iter().cloned().map(Value::Text).collect());
    }
    if let Some(kinds) = &filter.kinds {
        any_of(
            "kind",
            kinds.iter().map(|k| Value::Integer(i64::from(*k))).collect(),
        );
    }
    if let Some(since) = filter.since {
        clauses.push("created_at >= ?".to_string());
        values.push(Value::Integer(since));
    }
    if let Some(until) = filter.until {
        clauses.push("created_at <= ?".to_string());
        values.push(Value::Integer(until));
    }

    let mut sql =
        "SELECT id, pubkey, created_at, kind, tags, content, sig FROM records".to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id ASC");
    if let (Some(limit), false) = (filter.limit, filter.has_tag_constraints()) {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    (sql, values)
}
