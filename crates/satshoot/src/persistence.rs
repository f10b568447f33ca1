//! Durable state that survives restarts: the seen-set and cached trust scores.

use crate::error::Result;
use crate::wot::ScoreSnapshot;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Key-value persistence required by the notification gate and WoT engine.
///
/// `seen_insert` must check and insert in one step: two concurrent callers
/// with the same id get exactly one `true`.
pub trait Persistence: Send + Sync {
    /// Insert `id`; returns `true` when it was not present before.
    fn seen_insert(&self, id: &str) -> Result<bool>;

    fn seen_contains(&self, id: &str) -> Result<bool>;

    fn seen_clear(&self) -> Result<()>;

    fn load_scores(&self) -> Result<Option<ScoreSnapshot>>;

    /// Replace the stored scores wholesale.
    fn store_scores(&self, snapshot: &ScoreSnapshot) -> Result<()>;

    fn clear_scores(&self) -> Result<()>;
}

/// Process-local persistence, used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryPersistence {
    seen: Mutex<HashSet<String>>,
    scores: Mutex<Option<ScoreSnapshot>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn seen_insert(&self, id: &str) -> Result<bool> {
        Ok(self.seen.lock().insert(id.to_string()))
    }

    fn seen_contains(&self, id: &str) -> Result<bool> {
        Ok(self.seen.lock().contains(id))
    }

    fn seen_clear(&self) -> Result<()> {
        self.seen.lock().clear();
        Ok(())
    }

    fn load_scores(&self) -> Result<Option<ScoreSnapshot>> {
        Ok(self.scores.lock().clone())
    }

    fn store_scores(&self, snapshot: &ScoreSnapshot) -> Result<()> {
        *self.scores.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn clear_scores(&self) -> Result<()> {
        *self.scores.lock() = None;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed persistence.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening sync database at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    /// In-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )?;
        let version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        debug!("Current schema version: {}", version);

        if version < 1 {
            migrate_v1(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Running migration v1");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS seen_events (
            id TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS wot_scores (
            pubkey TEXT PRIMARY KEY,
            score REAL NOT NULL
        );

        -- at most one row: who the scores were computed for, and when
        CREATE TABLE IF NOT EXISTS wot_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            root TEXT NOT NULL,
            computed_at INTEGER NOT NULL
        );
        "#,
    )?;
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

impl Persistence for SqlitePersistence {
    fn seen_insert(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen_events (id) VALUES (?)",
            [id],
        )?;
        Ok(inserted == 1)
    }

    fn seen_contains(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row("SELECT 1 FROM seen_events WHERE id = ?", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn seen_clear(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM seen_events", [])?;
        Ok(())
    }

    fn load_scores(&self) -> Result<Option<ScoreSnapshot>> {
        let conn = self.conn.lock();
        let meta: Option<(String, i64)> = conn
            .query_row("SELECT root, computed_at FROM wot_meta WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let Some((root, computed_at)) = meta else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT pubkey, score FROM wot_scores")?;
        let scores = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(Some(ScoreSnapshot::new(
            root,
            computed_at.max(0) as u64,
            scores,
        )))
    }

    fn store_scores(&self, snapshot: &ScoreSnapshot) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM wot_scores", [])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO wot_scores (pubkey, score) VALUES (?, ?)")?;
            for (pubkey, score) in snapshot.scores() {
                insert.execute(params![pubkey, score])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO wot_meta (id, root, computed_at) VALUES (1, ?, ?)",
            params![snapshot.root(), snapshot.computed_at() as i64],
        )?;
        tx.commit()?;
        debug!("Stored {} trust scores", snapshot.len());
        Ok(())
    }

    fn clear_scores(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM wot_scores", [])?;
        tx.execute("DELETE FROM wot_meta", [])?;
        tx.commit()?;
        Ok(())
    }
}
