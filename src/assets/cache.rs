//! SQLite-backed named caches of request/response pairs.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::fetch::{AssetRequest, AssetResponse, ResponseKind};

/// Lifecycle timestamps of one cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRecord {
  pub installed: bool,
  pub activated: bool,
}

/// Named cache generations holding request/response pairs.
pub struct AssetCache {
  conn: Mutex<Connection>,
}

const ASSET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS asset_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    installed_at TEXT,
    activated_at TEXT
);

CREATE TABLE IF NOT EXISTS asset_entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    lookup_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    kind TEXT NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_asset_entries_lookup
    ON asset_entries(generation, lookup_hash);
"#;

impl AssetCache {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create asset cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open asset cache at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open asset cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(ASSET_SCHEMA)
      .map_err(|e| eyre!("Failed to create asset cache tables: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create the generation if it does not exist yet.
  pub fn open_generation(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO asset_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  /// Names of all generations.
  pub fn generations(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM asset_generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(names)
  }

  pub fn generation(&self, name: &str) -> Result<Option<GenerationRecord>> {
    self
      .conn()?
      .query_row(
        "SELECT installed_at IS NOT NULL, activated_at IS NOT NULL
         FROM asset_generations WHERE name = ?",
        params![name],
        |row| {
          Ok(GenerationRecord {
            installed: row.get(0)?,
            activated: row.get(1)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache {}: {}", name, e))
  }

  /// Record a finished install. A reinstalled generation has to be
  /// activated again before it serves.
  pub fn mark_installed(&self, name: &str) -> Result<()> {
    self.stamp(name, "installed_at = datetime('now'), activated_at = NULL")
  }

  pub fn mark_activated(&self, name: &str) -> Result<()> {
    self.stamp(name, "activated_at = datetime('now')")
  }

  fn stamp(&self, name: &str, assignments: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        &format!("UPDATE asset_generations SET {} WHERE name = ?", assignments),
        params![name],
      )
      .map_err(|e| eyre!("Failed to update cache {}: {}", name, e))?;
    Ok(())
  }

  /// Delete a generation with all its entries. Returns whether it existed.
  pub fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(
      "DELETE FROM asset_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM asset_generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  /// Store a response under its request, replacing any earlier entry.
  pub fn put(
    &self,
    generation: &str,
    request: &AssetRequest,
    response: &AssetResponse,
  ) -> Result<()> {
    let conn = self.conn()?;
    insert(&conn, generation, request, response)
  }

  /// Store every pair in one transaction.
  pub fn put_all(
    &self,
    generation: &str,
    entries: &[(AssetRequest, AssetResponse)],
  ) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for (request, response) in entries {
      insert(&tx, generation, request, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Find a cached response for `request` in `generation`.
  ///
  /// With `ignore_search` the query strings of both the stored and the
  /// incoming request are disregarded.
  pub fn match_request(
    &self,
    generation: &str,
    request: &AssetRequest,
    ignore_search: bool,
  ) -> Result<Option<AssetResponse>> {
    let conn = self.conn()?;
    let (column, hash) = if ignore_search {
      ("lookup_hash", lookup_hash(request))
    } else {
      ("request_hash", request_hash(request))
    };

    conn
      .query_row(
        &format!(
          "SELECT status, status_text, kind, content_type, body FROM asset_entries
           WHERE generation = ? AND {} = ?
           ORDER BY cached_at DESC LIMIT 1",
          column
        ),
        params![generation, hash],
        |row| {
          let kind: String = row.get(2)?;
          Ok(AssetResponse {
            status: row.get(0)?,
            status_text: row.get(1)?,
            kind: ResponseKind::parse(&kind),
            content_type: row.get(3)?,
            body: row.get(4)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))
  }

  /// Number of entries in a generation.
  pub fn len(&self, generation: &str) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM asset_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;
    Ok(count as usize)
  }
}

fn insert(
  conn: &Connection,
  generation: &str,
  request: &AssetRequest,
  response: &AssetResponse,
) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO asset_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO asset_entries
       (generation, request_hash, lookup_hash, method, url,
        status, status_text, kind, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request_hash(request),
        lookup_hash(request),
        request.method,
        request.url.as_str(),
        response.status,
        response.status_text,
        response.kind.as_str(),
        response.content_type,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to cache {}: {}", request.url, e))?;
  Ok(())
}

/// SHA256 hash for stable, fixed-length keys
fn hash_key(method: &str, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn request_hash(request: &AssetRequest) -> String {
  hash_key(&request.method, request.url.as_str())
}

fn lookup_hash(request: &AssetRequest) -> String {
  hash_key(&request.method, &request.url_without_search())
}
