//! Relational store
//!
//! SQLite behind a single connection guarded by a parking_lot mutex. Every
//! entity row implements [`Model`], which gives the generic find / list /
//! upsert / destroy operations the sync service and the API share.
//!
//! Timestamps are stored as epoch milliseconds, calendar dates as
//! `YYYY-MM-DD` text.

mod fleet;
mod tables;

pub use fleet::{AssignmentError, DatedRecord, RecordFilter};

use crate::models::EntityKind;
use crate::sync::gate::{self, GateDecision};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, types::Value, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    phone TEXT,
    role TEXT NOT NULL,
    password_hash TEXT NOT NULL DEFAULT '',
    licence_number TEXT,
    licence_expiry TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_licence_expiry
    ON users(licence_expiry) WHERE licence_expiry IS NOT NULL;

CREATE TABLE IF NOT EXISTS trucks (
    id TEXT PRIMARY KEY,
    plate_number TEXT NOT NULL,
    make TEXT NOT NULL,
    model TEXT NOT NULL,
    year INTEGER,
    status TEXT NOT NULL,
    driver_id TEXT,
    odometer REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trucks_driver ON trucks(driver_id);

CREATE TABLE IF NOT EXISTS expenses (
    id TEXT PRIMARY KEY,
    truck_id TEXT,
    driver_id TEXT,
    category TEXT NOT NULL,
    amount REAL NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_expenses_truck_date ON expenses(truck_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_expenses_driver_date ON expenses(driver_id, date DESC);

CREATE TABLE IF NOT EXISTS revenues (
    id TEXT PRIMARY KEY,
    truck_id TEXT,
    driver_id TEXT,
    amount REAL NOT NULL,
    client TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_revenues_truck_date ON revenues(truck_id, date DESC);

CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY,
    ticket_number TEXT NOT NULL,
    truck_id TEXT,
    driver_id TEXT,
    gross_weight REAL NOT NULL,
    tare_weight REAL NOT NULL,
    net_weight REAL NOT NULL,
    product TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_truck_date ON tickets(truck_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_driver_date ON tickets(driver_id, date DESC);

CREATE TABLE IF NOT EXISTS mileage_logs (
    id TEXT PRIMARY KEY,
    truck_id TEXT,
    driver_id TEXT,
    start_odometer REAL NOT NULL,
    end_odometer REAL NOT NULL,
    distance REAL NOT NULL,
    date TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mileage_truck_date ON mileage_logs(truck_id, date DESC);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at DESC);

-- Rows known to exist in the realtime store (published or received).
CREATE TABLE IF NOT EXISTS sync_markers (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);
"#;

/// A row type persisted in its own table, keyed by `id`.
///
/// `COLUMNS` must start with `id` and contain `updated_at`; `to_values`
/// returns values in `COLUMNS` order and `from_row` reads them back in the
/// same order.
pub trait Model: Sized + Send + Sync {
    const KIND: EntityKind;
    const COLUMNS: &'static [&'static str];
    /// Columns an upsert leaves untouched when the row already exists.
    const PRESERVED_ON_CONFLICT: &'static [&'static str] = &[];

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn to_values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Relational store handle, cheap to share behind an `Arc`.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database and apply the schema
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" && db_path != ":memory:" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Fleet database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fetch one row by primary key.
    pub fn find<M: Model>(&self, id: &str) -> Result<Option<M>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            M::COLUMNS.join(", "),
            M::KIND.table()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt.query_row(params![id], M::from_row).optional()?;
        Ok(row)
    }

    /// All rows, most recently updated first.
    pub fn list<M: Model>(&self) -> Result<Vec<M>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY updated_at DESC, id",
            M::COLUMNS.join(", "),
            M::KIND.table()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], M::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert-or-update by primary key.
    pub fn upsert<M: Model>(&self, row: &M) -> Result<()> {
        let conn = self.conn.lock();
        write_row(&conn, row)
    }

    /// Staleness-gated upsert: the stored timestamp is read and the row
    /// written under one lock acquisition.
    pub fn upsert_if_newer<M: Model>(&self, row: &M) -> Result<GateDecision> {
        let conn = self.conn.lock();
        let stored = stored_updated_at(&conn, M::KIND, row.id())?;
        let decision = gate::admit(row.updated_at(), stored);
        if decision.admits() {
            write_row(&conn, row)?;
        }
        Ok(decision)
    }

    /// Delete by primary key. Returns whether a row was removed.
    pub fn destroy<M: Model>(&self, id: &str) -> Result<bool> {
        self.destroy_kind(M::KIND, id)
    }

    /// Delete by primary key, dropping the sync marker with the row.
    pub fn destroy_kind(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        let removed = conn.execute(&sql, params![id])?;
        conn.prepare_cached("DELETE FROM sync_markers WHERE kind = ?1 AND id = ?2")?
            .execute(params![kind.as_str(), id])?;
        if removed > 0 {
            debug!(entity = %kind, id, "row destroyed");
        }
        Ok(removed > 0)
    }

    /// Record that a row exists in the realtime store.
    pub fn mark_synced(&self, kind: EntityKind, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("INSERT OR IGNORE INTO sync_markers (kind, id) VALUES (?1, ?2)")?
            .execute(params![kind.as_str(), id])
            .with_context(|| format!("Failed to mark {} {} synced", kind, id))?;
        Ok(())
    }

    /// Ids of local rows that have been seen in the realtime store.
    pub fn synced_ids(&self, kind: EntityKind) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT m.id FROM sync_markers m JOIN {} t ON t.id = m.id WHERE m.kind = ?1",
            kind.table()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let ids = stmt
            .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn.lock();
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Whether an error came from a UNIQUE / NOT NULL / CHECK constraint.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<rusqlite::Error>()
            .and_then(rusqlite::Error::sqlite_error_code)
            == Some(rusqlite::ErrorCode::ConstraintViolation)
    })
}

fn stored_updated_at(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let sql = format!("SELECT updated_at FROM {} WHERE id = ?1", kind.table());
    let ms: Option<i64> = conn
        .prepare_cached(&sql)?
        .query_row(params![id], |row| row.get(0))
        .optional()?;
    Ok(ms.and_then(DateTime::<Utc>::from_timestamp_millis))
}

fn upsert_sql<M: Model>() -> String {
    let columns = M::COLUMNS;
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| **c != "id" && !M::PRESERVED_ON_CONFLICT.contains(c))
        .map(|c| format!("{c}=excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        M::KIND.table(),
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn write_row<M: Model>(conn: &Connection, row: &M) -> Result<()> {
    let values = row.to_values();
    debug_assert_eq!(values.len(), M::COLUMNS.len());
    conn.prepare_cached(&upsert_sql::<M>())?
        .execute(params_from_iter(values))
        .with_context(|| format!("Failed to upsert {} {}", M::KIND, row.id()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Truck, TruckStatus};

    fn truck(id: &str, updated_ms: i64) -> Truck {
        let ts = DateTime::<Utc>::from_timestamp_millis(updated_ms).unwrap();
        Truck {
            id: id.to_string(),
            plate_number: "KDA 123A".to_string(),
            make: "Isuzu".to_string(),
            model: "FVZ".to_string(),
            year: Some(2019),
            status: TruckStatus::Active,
            driver_id: None,
            odometer: 120_500.0,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let t = truck("t1", 1_000);
        db.upsert(&t).unwrap();

        let found: Truck = db.find("t1").unwrap().expect("row should exist");
        assert_eq!(found, t);
        assert_eq!(db.count(EntityKind::Truck).unwrap(), 1);
    }

    #[test]
    fn test_upsert_overwrites_existing_row() {
        let db = Database::new(":memory:").unwrap();
        db.upsert(&truck("t1", 1_000)).unwrap();

        let mut t = truck("t1", 2_000);
        t.status = TruckStatus::Maintenance;
        db.upsert(&t).unwrap();

        let found: Truck = db.find("t1").unwrap().unwrap();
        assert_eq!(found.status, TruckStatus::Maintenance);
        assert_eq!(db.count(EntityKind::Truck).unwrap(), 1);
    }

    #[test]
    fn test_upsert_if_newer_respects_gate() {
        let db = Database::new(":memory:").unwrap();

        assert_eq!(db.upsert_if_newer(&truck("t1", 1_000)).unwrap(), GateDecision::Insert);

        let mut older = truck("t1", 500);
        older.make = "Older".to_string();
        assert!(!db.upsert_if_newer(&older).unwrap().admits());
        assert_eq!(db.find::<Truck>("t1").unwrap().unwrap().make, "Isuzu");

        let mut newer = truck("t1", 1_500);
        newer.make = "Scania".to_string();
        assert_eq!(db.upsert_if_newer(&newer).unwrap(), GateDecision::Update);
        assert_eq!(db.find::<Truck>("t1").unwrap().unwrap().make, "Scania");
    }

    #[test]
    fn test_replay_is_idempotent() {
        let db = Database::new(":memory:").unwrap();
        let t = truck("t1", 1_000);
        db.upsert_if_newer(&t).unwrap();
        let again = db.upsert_if_newer(&t).unwrap();
        assert!(!again.admits());
        assert_eq!(db.find::<Truck>("t1").unwrap().unwrap(), t);
    }

    #[test]
    fn test_destroy_missing_row_is_not_an_error() {
        let db = Database::new(":memory:").unwrap();
        db.upsert(&truck("t1", 1_000)).unwrap();

        assert!(db.destroy::<Truck>("t1").unwrap());
        assert!(!db.destroy::<Truck>("t1").unwrap());
        assert!(db.find::<Truck>("t1").unwrap().is_none());
    }

    #[test]
    fn test_sync_markers_follow_rows() {
        let db = Database::new(":memory:").unwrap();
        db.upsert(&truck("a", 1_000)).unwrap();
        db.upsert(&truck("b", 2_000)).unwrap();
        db.mark_synced(EntityKind::Truck, "a").unwrap();
        db.mark_synced(EntityKind::Truck, "a").unwrap();
        // No row behind this marker
        db.mark_synced(EntityKind::Truck, "ghost").unwrap();

        let ids = db.synced_ids(EntityKind::Truck).unwrap();
        assert_eq!(ids, HashSet::from(["a".to_string()]));
        assert!(db.synced_ids(EntityKind::Expense).unwrap().is_empty());

        db.destroy::<Truck>("a").unwrap();
        db.upsert(&truck("a", 3_000)).unwrap();
        assert!(db.synced_ids(EntityKind::Truck).unwrap().is_empty());
    }

    #[test]
    fn test_unique_email_conflict_is_a_constraint_violation() {
        use crate::models::{User, UserRole};
        let db = Database::new(":memory:").unwrap();
        let ts = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        let user = |id: &str| User {
            id: id.to_string(),
            name: "Admin".to_string(),
            email: "admin@fleet.test".to_string(),
            phone: None,
            role: UserRole::Admin,
            password_hash: String::new(),
            licence_number: None,
            licence_expiry: None,
            active: true,
            created_at: ts,
            updated_at: ts,
        };
        db.upsert(&user("u1")).unwrap();

        let err = db.upsert_if_newer(&user("u2")).unwrap_err();
        assert!(is_constraint_violation(&err), "{:#}", err);
        assert!(!is_constraint_violation(&anyhow::anyhow!("other")));
    }

    #[test]
    fn test_file_backed_database_reopens() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();
        {
            let db = Database::new(path).unwrap();
            db.upsert(&truck("t1", 1_000)).unwrap();
        }
        let db = Database::new(path).unwrap();
        assert!(db.find::<Truck>("t1").unwrap().is_some());
    }
}
