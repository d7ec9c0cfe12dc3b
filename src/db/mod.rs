pub mod migrations;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use migrations::{target_version, Migration, MIGRATIONS};

/// SQLite connection wrapper shared by the local store and the outbox.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path` and bring it to the current version.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn, MIGRATIONS)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open database: {}", e))?;
    Self::from_connection(conn, MIGRATIONS)
  }

  fn from_connection(conn: Connection, migrations: &[Migration]) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(migrations)?;
    Ok(db)
  }

  /// Apply every step between the stored version and the newest one.
  ///
  /// Each step runs in its own transaction together with the version bump, so
  /// an interrupted upgrade resumes at the first unapplied step.
  fn run_migrations(&self, migrations: &[Migration]) -> Result<()> {
    let mut conn = self.conn()?;
    let stored = Self::user_version(&conn)?;
    let target = migrations.len() as u32;

    if stored > target {
      return Err(eyre!(
        "Store version {} is newer than supported version {}",
        stored,
        target
      ));
    }

    for (idx, step) in migrations.iter().enumerate().skip(stored as usize) {
      let version = idx as u32 + 1;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin migration: {}", e))?;
      tx.execute_batch(step.sql)
        .map_err(|e| eyre!("Migration {} ({}) failed: {}", version, step.name, e))?;
      tx.pragma_update(None, "user_version", version)
        .map_err(|e| eyre!("Failed to record store version {}: {}", version, e))?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit migration {}: {}", version, e))?;
      debug!(version, step = step.name, "applied store migration");
    }

    if stored < target {
      info!(from = stored, to = target, "local store upgraded");
    }

    Ok(())
  }

  fn user_version(conn: &Connection) -> Result<u32> {
    conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(|e| eyre!("Failed to read store version: {}", e))
  }

  /// Current schema version of the open store.
  pub fn version(&self) -> Result<u32> {
    let conn = self.conn()?;
    Self::user_version(&conn)
  }

  /// Lock the connection.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl std::fmt::Debug for Database {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Database")
      .field("target_version", &target_version())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table_exists(db: &Database, name: &str) -> bool {
    let conn = db.conn().unwrap();
    conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
        [name],
        |row| row.get::<_, i64>(0),
      )
      .unwrap()
      > 0
  }

  #[test]
  fn test_fresh_store_reaches_target_version() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.version().unwrap(), target_version());
    assert!(table_exists(&db, "restaurants"));
    assert!(table_exists(&db, "reviews"));
    assert!(table_exists(&db, "idx_reviews_restaurant"));
    assert!(table_exists(&db, "pending_review"));
  }

  #[test]
  fn test_upgrade_from_partial_version_keeps_records() {
    let conn = Connection::open_in_memory().unwrap();
    let db = Database::from_connection(conn, &MIGRATIONS[..1]).unwrap();
    assert_eq!(db.version().unwrap(), 1);
    db.conn()
      .unwrap()
      .execute(
        "INSERT INTO restaurants (id, data) VALUES (7, '{\"id\":7}')",
        [],
      )
      .unwrap();
    assert!(!table_exists(&db, "reviews"));

    db.run_migrations(MIGRATIONS).unwrap();
    assert_eq!(db.version().unwrap(), target_version());
    assert!(table_exists(&db, "reviews"));

    let count: i64 = db
      .conn()
      .unwrap()
      .query_row("SELECT COUNT(*) FROM restaurants", [], |row| row.get(0))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn test_rerun_is_noop() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations(MIGRATIONS).unwrap();
    assert_eq!(db.version().unwrap(), target_version());
  }

  #[test]
  fn test_newer_store_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    conn
      .pragma_update(None, "user_version", target_version() + 1)
      .unwrap();
    assert!(Database::from_connection(conn, MIGRATIONS).is_err());
  }
}
