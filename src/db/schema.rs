/// Schema for the movie record cache.
///
/// Ordering and search run on the indexed columns; the full record lives in
/// `data` as JSON so fields added later decode with their defaults.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS movies (
    id INTEGER PRIMARY KEY,
    popularity REAL NOT NULL,
    search_title TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_movies_popularity
    ON movies(popularity DESC, id ASC);
"#;
