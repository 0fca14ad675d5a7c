//! Bounded SQLite record cache for movies.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use super::images::ImageStore;
use crate::db::Database;
use crate::tmdb::Movie;

/// Default bound on cached records
pub const DEFAULT_MAX_RECORDS: usize = 50;

/// Summary of the cache contents
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
  pub count: usize,
  /// Most recent write, if any record is cached
  pub newest_cached_at: Option<DateTime<Utc>>,
}

/// Movie records persisted in SQLite, bounded by popularity.
///
/// All access goes through one connection behind a mutex, so write batches
/// never interleave. Storage failures are logged and surface as empty or
/// absent results.
#[derive(Clone)]
pub struct RecordCache {
  conn: Arc<Mutex<Connection>>,
  images: ImageStore,
  max_records: usize,
}

impl RecordCache {
  pub fn new(db: Database, images: ImageStore) -> Self {
    Self {
      conn: Arc::new(Mutex::new(db.into_connection())),
      images,
      max_records: DEFAULT_MAX_RECORDS,
    }
  }

  /// Lower the record bound. Values are clamped to `1..=DEFAULT_MAX_RECORDS`.
  pub fn with_max_records(mut self, max_records: usize) -> Self {
    self.max_records = max_records.clamp(1, DEFAULT_MAX_RECORDS);
    self
  }

  pub fn max_records(&self) -> usize {
    self.max_records
  }

  /// Run `op` against the connection on the blocking pool.
  ///
  /// Errors are logged under `what` and collapsed to `None`.
  async fn run<T, F>(&self, what: &'static str, op: F) -> Option<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    let result = tokio::task::spawn_blocking(move || -> Result<T> {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      op(&mut *conn).map_err(|e| eyre!("{}", e))
    })
    .await;

    match result {
      Ok(Ok(value)) => Some(value),
      Ok(Err(e)) => {
        tracing::warn!(operation = what, error = %e, "record cache operation failed");
        None
      }
      Err(e) => {
        tracing::warn!(operation = what, error = %e, "record cache task failed");
        None
      }
    }
  }

  /// Insert or replace each record by id, then evict down to the bound.
  ///
  /// Images of evicted records are removed once the batch has committed.
  pub async fn upsert(&self, movies: &[Movie]) {
    self.write_batch(movies, false).await;
  }

  /// Replace the whole cache with `movies` in one transaction.
  ///
  /// Equivalent to `clear` followed by `upsert`, without letting another
  /// batch run in between. Images of records that do not survive are removed.
  pub async fn replace(&self, movies: &[Movie]) {
    self.write_batch(movies, true).await;
  }

  async fn write_batch(&self, movies: &[Movie], clear_first: bool) {
    if movies.is_empty() && !clear_first {
      return;
    }

    let movies = movies.to_vec();
    let max_records = self.max_records;
    let evicted = self
      .run("upsert", move |conn| {
        let tx = conn.transaction()?;
        let mut dropped = Vec::new();
        if clear_first {
          dropped = all_ids(&tx)?;
          dropped.retain(|id| !movies.iter().any(|m| m.id == *id));
          tx.execute("DELETE FROM movies", [])?;
        }
        upsert_rows(&tx, &movies)?;
        dropped.extend(evict_overflow(&tx, max_records)?);
        tx.commit()?;
        Ok(dropped)
      })
      .await
      .unwrap_or_default();

    if !evicted.is_empty() {
      tracing::info!(count = evicted.len(), replaced = clear_first, "evicted cached movies");
      futures::future::join_all(evicted.iter().map(|id| self.images.remove_all(*id))).await;
    }
  }

  /// Delete every record. Image files are left in place.
  pub async fn clear(&self) {
    let deleted = self
      .run("clear", |conn| conn.execute("DELETE FROM movies", []))
      .await;
    if let Some(deleted) = deleted {
      tracing::debug!(deleted, "cleared record cache");
    }
  }

  pub async fn get(&self, id: i64) -> Option<Movie> {
    let data: Vec<u8> = self
      .run("get", move |conn| {
        conn
          .query_row(
            "SELECT data FROM movies WHERE id = ?1",
            params![id],
            |row| row.get(0),
          )
          .optional()
      })
      .await
      .flatten()?;

    decode_movie(&data)
  }

  pub async fn contains(&self, id: i64) -> bool {
    self
      .run("contains", move |conn| {
        conn
          .query_row("SELECT 1 FROM movies WHERE id = ?1", params![id], |_| Ok(()))
          .optional()
      })
      .await
      .flatten()
      .is_some()
  }

  /// All records, most popular first.
  pub async fn list(&self) -> Vec<Movie> {
    self
      .run("list", |conn| {
        let mut stmt = conn.prepare("SELECT data FROM movies ORDER BY popularity DESC, id ASC")?;
        let rows = stmt
          .query_map([], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .unwrap_or_default()
      .iter()
      .filter_map(|data| decode_movie(data))
      .collect()
  }

  /// Records whose title contains `query`, ignoring case and diacritics,
  /// most popular first. A blank query matches nothing.
  pub async fn search(&self, query: &str) -> Vec<Movie> {
    let needle = fold_text(query.trim());
    if needle.is_empty() {
      return Vec::new();
    }

    self
      .run("search", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT data FROM movies
           WHERE instr(search_title, ?1) > 0
           ORDER BY popularity DESC, id ASC",
        )?;
        let rows = stmt
          .query_map(params![needle], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .unwrap_or_default()
      .iter()
      .filter_map(|data| decode_movie(data))
      .collect()
  }

  pub async fn stats(&self) -> CacheStats {
    let row = self
      .run("stats", |conn| {
        conn.query_row(
          "SELECT COUNT(*), MAX(cached_at) FROM movies",
          [],
          |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )
      })
      .await;

    match row {
      Some((count, newest)) => CacheStats {
        count: count as usize,
        newest_cached_at: newest.as_deref().and_then(|s| parse_datetime(s).ok()),
      },
      None => CacheStats {
        count: 0,
        newest_cached_at: None,
      },
    }
  }
}

fn upsert_rows(tx: &Transaction<'_>, movies: &[Movie]) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT INTO movies (id, popularity, search_title, data, cached_at)
     VALUES (?1, ?2, ?3, ?4, datetime('now'))
     ON CONFLICT(id) DO UPDATE SET
       popularity = excluded.popularity,
       search_title = excluded.search_title,
       data = excluded.data,
       cached_at = excluded.cached_at",
  )?;

  for movie in movies {
    let data =
      serde_json::to_vec(movie).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    stmt.execute(params![
      movie.id,
      movie.popularity,
      fold_text(&movie.title),
      data
    ])?;
  }

  Ok(())
}

fn all_ids(tx: &Transaction<'_>) -> rusqlite::Result<Vec<i64>> {
  let mut stmt = tx.prepare("SELECT id FROM movies")?;
  let ids = stmt
    .query_map([], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(ids)
}

/// Delete every row beyond the first `max_records` by (popularity DESC, id ASC).
fn evict_overflow(tx: &Transaction<'_>, max_records: usize) -> rusqlite::Result<Vec<i64>> {
  let overflow: Vec<i64> = {
    let mut stmt =
      tx.prepare("SELECT id FROM movies ORDER BY popularity DESC, id ASC LIMIT -1 OFFSET ?1")?;
    let ids = stmt
      .query_map(params![max_records as i64], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<i64>>>()?;
    ids
  };

  let mut stmt = tx.prepare("DELETE FROM movies WHERE id = ?1")?;
  for id in &overflow {
    stmt.execute(params![id])?;
  }

  Ok(overflow)
}

fn decode_movie(data: &[u8]) -> Option<Movie> {
  match serde_json::from_slice(data) {
    Ok(movie) => Some(movie),
    Err(e) => {
      tracing::warn!(error = %e, "skipping undecodable cached movie");
      None
    }
  }
}

/// Lowercase, decompose and strip combining marks, so "Amélie" and
/// "AMELIE" fold to the same key.
///
/// Latin letters whose stroke or ligature has no Unicode decomposition are
/// mapped by hand. Titles cached before a mapping existed keep their old
/// folded key until they are written again.
pub(crate) fn fold_text(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.to_lowercase().nfd().filter(|c| !is_combining_mark(*c)) {
    match c {
      'ø' => out.push('o'),
      'ł' => out.push('l'),
      'đ' | 'ð' => out.push('d'),
      'ħ' => out.push('h'),
      'ı' => out.push('i'),
      'ß' => out.push_str("ss"),
      'æ' => out.push_str("ae"),
      'œ' => out.push_str("oe"),
      'þ' => out.push_str("th"),
      _ => out.push(c),
    }
  }
  out
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
