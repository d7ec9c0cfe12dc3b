//! Local store handle and its SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{Cacheable, Collection};
use crate::db::Database;
use crate::error::{FetchError, FetchResult};

/// All records of a collection.
#[derive(Debug, Clone)]
pub struct CachedList<T> {
  /// Records ordered by key
  pub entities: Vec<T>,
  /// When the oldest record was written
  pub cached_at: Option<DateTime<Utc>>,
}

/// A single cached record.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  pub entity: T,
  /// When the record was written
  pub cached_at: DateTime<Utc>,
}

/// Handle to the local persistent store.
///
/// Either the store opened and migrated, or this environment has none and
/// every caller falls back to the network.
#[derive(Clone, Debug)]
pub enum LocalStore {
  Active(Arc<SqliteStorage>),
  Unavailable,
}

impl LocalStore {
  /// Open the store at `path`, degrading to [`LocalStore::Unavailable`] on failure.
  pub fn open(enabled: bool, path: Result<PathBuf>) -> Self {
    if !enabled {
      return Self::Unavailable;
    }

    let opened = path.and_then(|p| Database::open(&p));
    match opened {
      Ok(db) => {
        debug!(version = ?db.version().ok(), "local store opened");
        Self::Active(Arc::new(SqliteStorage::new(Arc::new(db))))
      }
      Err(e) => {
        warn!(error = %e, "local store unavailable, running network-only");
        Self::Unavailable
      }
    }
  }

  /// In-memory store.
  pub fn in_memory() -> Result<Self> {
    let db = Database::open_in_memory()?;
    Ok(Self::Active(Arc::new(SqliteStorage::new(Arc::new(db)))))
  }

  pub fn is_active(&self) -> bool {
    matches!(self, Self::Active(_))
  }

  /// The storage backend, or [`FetchError::Unsupported`].
  pub fn storage(&self) -> FetchResult<&SqliteStorage> {
    match self {
      Self::Active(storage) => Ok(storage),
      Self::Unavailable => Err(FetchError::Unsupported),
    }
  }
}

/// SQLite-backed record collections.
#[derive(Debug)]
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Shared database, for components that keep their own tables in it.
  pub fn database(&self) -> &Arc<Database> {
    &self.db
  }

  /// Upsert a single record keyed by its identifier.
  pub fn put<T: Cacheable>(&self, entity: &T) -> Result<()> {
    let conn = self.db.conn()?;
    insert(&conn, entity)
  }

  /// Upsert many records in one transaction.
  pub fn put_all<T: Cacheable>(&self, entities: &[T]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entity in entities {
      insert(&tx, entity)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  pub fn get<T: Cacheable>(&self, key: i64) -> Result<Option<CachedEntity<T>>> {
    let conn = self.db.conn()?;
    let Collection { table, .. } = T::collection();

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        &format!("SELECT data, cached_at FROM {} WHERE id = ?", table),
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", table, key, e))?;

    match row {
      Some((data, cached_at_str)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { entity, cached_at }))
      }
      None => Ok(None),
    }
  }

  /// Every record in the collection.
  pub fn get_all<T: Cacheable>(&self) -> Result<CachedList<T>> {
    let conn = self.db.conn()?;
    let Collection { table, .. } = T::collection();

    let mut stmt = conn
      .prepare(&format!("SELECT data, cached_at FROM {} ORDER BY id", table))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query {}: {}", table, e))?
      .filter_map(|r| r.ok())
      .collect();

    let cached_at = rows
      .iter()
      .filter_map(|(_, at)| parse_datetime(at).ok())
      .min();

    let entities = rows
      .into_iter()
      .filter_map(|(data, _)| serde_json::from_slice(&data).ok())
      .collect();

    Ok(CachedList {
      entities,
      cached_at,
    })
  }

  /// Records whose secondary index column equals `index_key`.
  pub fn get_by_index<T: Cacheable>(&self, index_key: i64) -> Result<Vec<T>> {
    let conn = self.db.conn()?;
    let Collection {
      table,
      index_column,
    } = T::collection();
    let column = index_column.ok_or_else(|| eyre!("Collection {} has no index", table))?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data FROM {} WHERE {} = ? ORDER BY id",
        table, column
      ))
      .map_err(|e| eyre!("Failed to prepare index query: {}", e))?;

    let entities = stmt
      .query_map(params![index_key], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query {} by {}: {}", table, column, e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(entities)
  }

  /// Remove a record. Returns whether it existed.
  pub fn delete<T: Cacheable>(&self, key: i64) -> Result<bool> {
    let conn = self.db.conn()?;
    let table = T::collection().table;
    let removed = conn
      .execute(&format!("DELETE FROM {} WHERE id = ?", table), params![key])
      .map_err(|e| eyre!("Failed to delete from {}: {}", table, e))?;
    Ok(removed > 0)
  }

  /// Remove every record of the collection.
  pub fn clear<T: Cacheable>(&self) -> Result<()> {
    let conn = self.db.conn()?;
    let table = T::collection().table;
    conn
      .execute(&format!("DELETE FROM {}", table), [])
      .map_err(|e| eyre!("Failed to clear {}: {}", table, e))?;
    Ok(())
  }
}

fn insert<T: Cacheable>(conn: &Connection, entity: &T) -> Result<()> {
  let Collection {
    table,
    index_column,
  } = T::collection();
  let key = entity.cache_key();
  let data =
    serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

  let written = match index_column {
    Some(column) => {
      let index_key = entity
        .index_key()
        .ok_or_else(|| eyre!("{} {} has no {}", table, key, column))?;
      conn.execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, {}, data, cached_at) VALUES (?, ?, ?, datetime('now'))",
          table, column
        ),
        params![key, index_key, data],
      )
    }
    None => conn.execute(
      &format!(
        "INSERT OR REPLACE INTO {} (id, data, cached_at) VALUES (?, ?, datetime('now'))",
        table
      ),
      params![key, data],
    ),
  };
  written.map_err(|e| eyre!("Failed to store {} {}: {}", table, key, e))?;

  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Dish {
    id: i64,
    name: String,
  }

  impl Cacheable for Dish {
    fn cache_key(&self) -> i64 {
      self.id
    }

    fn collection() -> Collection {
      Collection {
        table: "restaurants",
        index_column: None,
      }
    }
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Note {
    id: i64,
    restaurant_id: i64,
  }

  impl Cacheable for Note {
    fn cache_key(&self) -> i64 {
      self.id
    }

    fn index_key(&self) -> Option<i64> {
      Some(self.restaurant_id)
    }

    fn collection() -> Collection {
      Collection {
        table: "reviews",
        index_column: Some("restaurant_id"),
      }
    }
  }

  fn storage() -> Arc<SqliteStorage> {
    match LocalStore::in_memory().unwrap() {
      LocalStore::Active(s) => s,
      LocalStore::Unavailable => unreachable!(),
    }
  }

  #[test]
  fn test_put_replaces_by_key() {
    let storage = storage();
    storage
      .put(&Dish {
        id: 1,
        name: "old".into(),
      })
      .unwrap();
    storage
      .put(&Dish {
        id: 1,
        name: "new".into(),
      })
      .unwrap();

    let all = storage.get_all::<Dish>().unwrap();
    assert_eq!(all.entities.len(), 1);
    assert_eq!(all.entities[0].name, "new");
    assert!(all.cached_at.is_some());
  }

  #[test]
  fn test_get_missing_is_none() {
    let storage = storage();
    assert!(storage.get::<Dish>(42).unwrap().is_none());
  }

  #[test]
  fn test_index_lookup() {
    let storage = storage();
    storage
      .put_all(&[
        Note {
          id: 1,
          restaurant_id: 10,
        },
        Note {
          id: 2,
          restaurant_id: 11,
        },
        Note {
          id: 3,
          restaurant_id: 10,
        },
      ])
      .unwrap();

    let notes = storage.get_by_index::<Note>(10).unwrap();
    assert_eq!(notes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 3]);
    assert!(storage.get_by_index::<Note>(99).unwrap().is_empty());
    assert!(storage.get_by_index::<Dish>(10).is_err());
  }

  #[test]
  fn test_delete_and_clear() {
    let storage = storage();
    storage
      .put_all(&[
        Dish {
          id: 1,
          name: "a".into(),
        },
        Dish {
          id: 2,
          name: "b".into(),
        },
      ])
      .unwrap();

    assert!(storage.delete::<Dish>(1).unwrap());
    assert!(!storage.delete::<Dish>(1).unwrap());
    storage.clear::<Dish>().unwrap();
    assert!(storage.get_all::<Dish>().unwrap().entities.is_empty());
  }

  #[test]
  fn test_disabled_store_is_unavailable() {
    let store = LocalStore::open(false, Ok(PathBuf::from("/nonexistent/store.db")));
    assert!(!store.is_active());
    assert!(matches!(store.storage(), Err(FetchError::Unsupported)));
  }
}
