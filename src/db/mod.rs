pub mod schema;

use crate::config::Config;
use crate::record::MessageRecord;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// VM instructions between two checks of the query budget.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// One result row of a generated query, keyed by column name.
pub type QueryRow = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive unavailable: {0}")]
    Unavailable(String),
    #[error("query exceeded its resource budget")]
    ResourceExhausted,
    #[error("archive is busy: {0}")]
    Throttled(String),
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("archive error: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for ArchiveError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => ArchiveError::ResourceExhausted,
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                ArchiveError::Throttled(err.to_string())
            }
            Some(ErrorCode::CannotOpen) => ArchiveError::Unavailable(err.to_string()),
            _ => ArchiveError::Store(err.to_string()),
        }
    }
}

/// The document store the ingestion engine writes to and the ask pipeline reads from.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), ArchiveError>;

    /// Create-or-replace keyed by `record.id`.
    async fn upsert(&self, record: MessageRecord) -> Result<(), ArchiveError>;

    /// Highest stored `timestamp_epoch` for the channel, if any.
    async fn max_timestamp_epoch(&self, channel_id: &str) -> Result<Option<i64>, ArchiveError>;

    /// Runs a single read-only statement over the whole archive.
    async fn query(&self, text: &str) -> Result<Vec<QueryRow>, ArchiveError>;

    /// Stored records for the channel.
    async fn count(&self, channel_id: &str) -> Result<u64, ArchiveError>;
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    query_budget: Duration,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self, ArchiveError> {
        Self::open(&config.database_url, Duration::from_millis(config.query_timeout_ms))
    }

    pub fn open(path: &str, query_budget: Duration) -> Result<Self, ArchiveError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ArchiveError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            query_budget,
        })
    }

    pub fn execute_init(&self) -> Result<(), ArchiveError> {
        info!("Database: Initializing schema...");
        let conn = self.conn();
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on the blocking pool so SQLite work never stalls the async scheduler.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, ArchiveError>
    where
        F: FnOnce(&Database) -> Result<T, ArchiveError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ArchiveError::Store(format!("blocking task failed: {}", e)))?
    }

    pub fn upsert_message(&self, record: &MessageRecord) -> Result<(), ArchiveError> {
        debug!(
            "Database: Upserting message {} from {} in channel {}",
            record.id, record.author_id, record.channel_id
        );
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, channel_id, guild_id, author_id, author_name,
                author_display_name, content, timestamp, timestamp_epoch,
                attachment_count, reaction_count, edited_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                channel_id = excluded.channel_id,
                guild_id = excluded.guild_id,
                author_id = excluded.author_id,
                author_name = excluded.author_name,
                author_display_name = excluded.author_display_name,
                content = excluded.content,
                timestamp = excluded.timestamp,
                timestamp_epoch = excluded.timestamp_epoch,
                attachment_count = excluded.attachment_count,
                reaction_count = excluded.reaction_count,
                edited_timestamp = excluded.edited_timestamp",
            params![
                record.id,
                record.channel_id,
                record.guild_id,
                record.author_id,
                record.author_name,
                record.author_display_name,
                record.content,
                record.timestamp,
                record.timestamp_epoch,
                record.attachment_count,
                record.reaction_count,
                record.edited_timestamp,
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, ArchiveError> {
        use rusqlite::OptionalExtension;
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT id, channel_id, guild_id, author_id, author_name, author_display_name,
                        content, timestamp, timestamp_epoch, attachment_count, reaction_count,
                        edited_timestamp
                 FROM messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(MessageRecord {
                        id: row.get(0)?,
                        channel_id: row.get(1)?,
                        guild_id: row.get(2)?,
                        author_id: row.get(3)?,
                        author_name: row.get(4)?,
                        author_display_name: row.get(5)?,
                        content: row.get(6)?,
                        timestamp: row.get(7)?,
                        timestamp_epoch: row.get(8)?,
                        attachment_count: row.get(9)?,
                        reaction_count: row.get(10)?,
                        edited_timestamp: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_messages(&self, channel_id: &str) -> Result<u64, ArchiveError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
            [channel_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn latest_epoch(&self, channel_id: &str) -> Result<Option<i64>, ArchiveError> {
        let conn = self.conn();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp_epoch) FROM messages WHERE channel_id = ?1",
            [channel_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Executes one generated statement under the query budget.
    /// Statements that could modify the archive are rejected before running.
    pub fn run_query(&self, sql: &str) -> Result<Vec<QueryRow>, ArchiveError> {
        let conn = self.conn();
        let budget = self.query_budget;
        let started = Instant::now();
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || started.elapsed() > budget));

        let result = (|| {
            let mut stmt = conn.prepare(sql)?;
            if !stmt.readonly() {
                return Err(ArchiveError::Rejected(
                    "statement would modify the archive".to_string(),
                ));
            }
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = Map::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    map.insert(name.clone(), value_to_json(row.get_ref(idx)?));
                }
                out.push(map);
            }
            Ok(out)
        })();

        conn.progress_handler(0, None::<fn() -> bool>);
        if let Ok(rows) = &result {
            debug!("Database: Query returned {} rows in {:?}", rows.len(), started.elapsed());
        }
        result
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[async_trait]
impl Archive for Database {
    async fn ping(&self) -> Result<(), ArchiveError> {
        self.run_blocking(|db| {
            db.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn upsert(&self, record: MessageRecord) -> Result<(), ArchiveError> {
        self.run_blocking(move |db| db.upsert_message(&record)).await
    }

    async fn max_timestamp_epoch(&self, channel_id: &str) -> Result<Option<i64>, ArchiveError> {
        let channel_id = channel_id.to_string();
        self.run_blocking(move |db| db.latest_epoch(&channel_id)).await
    }

    async fn query(&self, text: &str) -> Result<Vec<QueryRow>, ArchiveError> {
        let text = text.to_string();
        self.run_blocking(move |db| db.run_query(&text)).await
    }

    async fn count(&self, channel_id: &str) -> Result<u64, ArchiveError> {
        let channel_id = channel_id.to_string();
        self.run_blocking(move |db| db.count_messages(&channel_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:", Duration::from_secs(5)).unwrap();
        db.execute_init().unwrap();
        db
    }

    fn record(id: &str, channel: &str, epoch: i64, content: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            channel_id: channel.to_string(),
            guild_id: Some("g1".to_string()),
            author_id: "u1".to_string(),
            author_name: "flyxowl".to_string(),
            author_display_name: "Fly".to_string(),
            content: content.to_string(),
            timestamp: crate::record::format_iso(chrono::DateTime::from_timestamp(epoch, 0).unwrap()),
            timestamp_epoch: epoch,
            attachment_count: 0,
            reaction_count: 0,
            edited_timestamp: None,
        }
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let db = test_db();
        db.upsert_message(&record("1", "c1", 1_600_000_000, "first draft")).unwrap();
        db.upsert_message(&record("1", "c1", 1_600_000_000, "edited")).unwrap();

        assert_eq!(db.count_messages("c1").unwrap(), 1);
        let stored = db.get_message("1").unwrap().unwrap();
        assert_eq!(stored.content, "edited");
    }

    #[test]
    fn test_latest_epoch_is_per_channel() {
        let db = test_db();
        assert_eq!(db.latest_epoch("c1").unwrap(), None);

        db.upsert_message(&record("1", "c1", 100, "a")).unwrap();
        db.upsert_message(&record("2", "c1", 300, "b")).unwrap();
        db.upsert_message(&record("3", "c2", 900, "c")).unwrap();

        assert_eq!(db.latest_epoch("c1").unwrap(), Some(300));
        assert_eq!(db.latest_epoch("c2").unwrap(), Some(900));
    }

    #[test]
    fn test_query_returns_named_columns() {
        let db = test_db();
        db.upsert_message(&record("1", "c1", 100, "Hello World")).unwrap();
        db.upsert_message(&record("2", "c1", 200, "goodbye")).unwrap();

        let rows = db
            .run_query("SELECT id, content FROM messages WHERE content LIKE '%hello%' ORDER BY timestamp DESC")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::from("1"));
        assert_eq!(rows[0]["content"], Value::from("Hello World"));

        let count = db.run_query("SELECT COUNT(*) AS message_count FROM messages").unwrap();
        assert_eq!(count[0]["message_count"], Value::from(2));
    }

    #[test]
    fn test_query_rejects_writes() {
        let db = test_db();
        db.upsert_message(&record("1", "c1", 100, "keep me")).unwrap();

        let result = db.run_query("DELETE FROM messages");
        assert!(matches!(result, Err(ArchiveError::Rejected(_))));
        assert_eq!(db.count_messages("c1").unwrap(), 1);
    }

    #[test]
    fn test_query_budget_interrupts_expensive_statements() {
        let db = Database::open(":memory:", Duration::from_millis(1)).unwrap();
        db.execute_init().unwrap();

        let result = db.run_query(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 100000000)
             SELECT COUNT(*) FROM n",
        );
        assert!(matches!(result, Err(ArchiveError::ResourceExhausted)), "{:?}", result);

        // The handler is cleared afterwards; ordinary statements still run.
        assert!(db.run_query("SELECT COUNT(*) FROM messages").is_ok());
    }

    #[test]
    fn test_invalid_sql_is_a_store_error() {
        let db = test_db();
        let result = db.run_query("SELECT nope FROM nowhere");
        assert!(matches!(result, Err(ArchiveError::Store(_))));
    }

    #[tokio::test]
    async fn test_archive_trait_roundtrip() {
        let db = test_db();
        db.ping().await.unwrap();
        db.upsert(record("9", "c9", 42, "via trait")).await.unwrap();
        assert_eq!(db.max_timestamp_epoch("c9").await.unwrap(), Some(42));
        assert_eq!(db.count("c9").await.unwrap(), 1);
        let rows = db.query("SELECT content FROM messages").await.unwrap();
        assert_eq!(rows[0]["content"], Value::from("via trait"));
    }

    #[test]
    fn test_on_disk_archive_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path, Duration::from_secs(5)).unwrap();
        db.execute_init().unwrap();
        db.upsert_message(&record("1", "c1", 500, "persisted")).unwrap();
        drop(db);

        let reopened = Database::open(path, Duration::from_secs(5)).unwrap();
        reopened.execute_init().unwrap();
        assert_eq!(reopened.latest_epoch("c1").unwrap(), Some(500));
    }
}
