//! Ordered, additive schema migrations for the local store.
//!
//! The stored version lives in SQLite's `user_version`. Step `n` in
//! [`MIGRATIONS`] moves the store from version `n` to `n + 1`. Steps only ever
//! create collections or indexes, and each one is safe to re-run.

/// A single schema migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
  /// Short description for logs
  pub name: &'static str,
  pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    name: "create restaurants collection",
    sql: r#"
CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  },
  Migration {
    name: "create reviews collection",
    sql: r#"
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY,
    restaurant_id INTEGER NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  },
  Migration {
    name: "index reviews by restaurant",
    sql: r#"
CREATE INDEX IF NOT EXISTS idx_reviews_restaurant ON reviews(restaurant_id);
"#,
  },
  Migration {
    name: "create pending review outbox",
    sql: r#"
-- Single slot: the CHECK keeps at most one row
CREATE TABLE IF NOT EXISTS pending_review (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    data BLOB NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  },
];

/// Version a fully migrated store reports.
pub fn target_version() -> u32 {
  MIGRATIONS.len() as u32
}
