/// Statements creating a fresh index, run in order.
///
/// Each entry is `(description, sql)`; the description names the failing step
/// when initialization aborts.
pub const SCHEMA: &[(&str, &str)] = &[
  (
    "items table",
    r#"
CREATE TABLE items (
    id           INTEGER NOT NULL PRIMARY KEY,
    title        TEXT    NOT NULL,
    content_url  TEXT    NOT NULL,
    permalink    TEXT    NOT NULL,
    published_at INTEGER NOT NULL,
    alt_text     TEXT    NOT NULL,
    transcript   TEXT    NOT NULL,
    news         TEXT    NOT NULL,
    payload      BLOB    NULL,

    CONSTRAINT published_at_check CHECK (published_at > 0),
    CONSTRAINT id_check CHECK (id > 0)
)"#,
  ),
  (
    "searchable text index",
    "CREATE INDEX items_text_index ON items(title, alt_text, transcript, news)",
  ),
  (
    "sync_watermark table",
    "CREATE TABLE sync_watermark (synced_at INTEGER NOT NULL, last_id INTEGER NOT NULL)",
  ),
  (
    "settings table",
    "CREATE TABLE settings (name TEXT NOT NULL, value TEXT NOT NULL)",
  ),
  (
    "sync watermark",
    "INSERT INTO sync_watermark (synced_at, last_id) VALUES (0, 0)",
  ),
];

/// Setting holding the offline flag, `"1"` or `"0"`.
pub const OFFLINE_SETTING: &str = "offline";

pub const INSERT_SETTING: &str = "INSERT INTO settings (name, value) VALUES (?1, ?2)";

pub const SELECT_SETTING: &str = "SELECT value FROM settings WHERE name = ?1 LIMIT 1";

/// Insert or update an item. A NULL payload never erases a stored image.
pub const UPSERT_ITEM: &str = r#"INSERT INTO items
    (id, title, content_url, permalink, published_at, alt_text, transcript, news, payload)
VALUES
    (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    content_url = excluded.content_url,
    permalink = excluded.permalink,
    published_at = excluded.published_at,
    alt_text = excluded.alt_text,
    transcript = excluded.transcript,
    news = excluded.news,
    payload = coalesce(excluded.payload, items.payload)"#;

pub const SELECT_ITEM: &str = r#"SELECT id, title, content_url, permalink, published_at,
    alt_text, transcript, news, payload
FROM items WHERE id = ?1"#;

pub const SEARCH_ITEMS: &str = r#"SELECT id, title, content_url, permalink, published_at,
    alt_text, transcript, news, payload
FROM items
WHERE title LIKE ?1 ESCAPE '\'
   OR alt_text LIKE ?1 ESCAPE '\'
   OR transcript LIKE ?1 ESCAPE '\'
   OR news LIKE ?1 ESCAPE '\'
ORDER BY id DESC
LIMIT ?2"#;
