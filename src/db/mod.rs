//! Catalog store: a single-writer SQLite database over photos, faces,
//! clusters, persons and scan sessions.

mod models;
mod schema;
mod store;

use std::cell::Cell;
use std::path::Path;

use rusqlite::Connection;

use crate::error::{CatalogError, Result};

pub use models::{
    BoundingBox, Cluster, ClusterSummary, Face, Person, Photo, ScanSession, ScanStatus,
};

/// Current time as an ISO-8601 UTC timestamp (`2026-02-22T10:00:00Z`).
pub fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub struct Database {
    conn: Connection,
    in_tx: Cell<bool>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            in_tx: Cell::new(false),
        })
    }

    /// In-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            in_tx: Cell::new(false),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA)?;
        self.run_migrations();
        Ok(())
    }

    fn run_migrations(&self) {
        for migration in schema::MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a write transaction. Nesting is disallowed.
    pub fn begin_transaction(&self) -> Result<()> {
        if self.in_tx.get() {
            return Err(CatalogError::InvalidState(
                "transaction already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN")?;
        self.in_tx.set(true);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if !self.in_tx.get() {
            return Err(CatalogError::InvalidState(
                "commit without open transaction".to_string(),
            ));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_tx.set(false);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if !self.in_tx.get() {
            return Err(CatalogError::InvalidState(
                "rollback without open transaction".to_string(),
            ));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.in_tx.set(false);
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_tx.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
    }

    #[test]
    fn test_migration_adds_cluster_person_column() {
        let db = Database::open_in_memory().unwrap();
        // Base layout predates clusters.person_id; initialize() upgrades it.
        db.conn.execute_batch(schema::SCHEMA).unwrap();
        db.initialize().unwrap();
        db.conn
            .execute(
                "INSERT INTO clusters (centroid, face_count, created_date, person_id) \
                 VALUES (NULL, 0, '2026-01-01T00:00:00Z', NULL)",
                [],
            )
            .unwrap();
    }

    #[test]
    fn test_nested_begin_is_invalid_state() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.begin_transaction().unwrap();
        let err = db.begin_transaction().unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState(_)));
        db.rollback().unwrap();
    }

    #[test]
    fn test_commit_without_begin_is_invalid_state() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        assert!(matches!(
            db.commit().unwrap_err(),
            CatalogError::InvalidState(_)
        ));
        assert!(matches!(
            db.rollback().unwrap_err(),
            CatalogError::InvalidState(_)
        ));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
