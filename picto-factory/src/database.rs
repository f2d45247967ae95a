//! SQLite-backed persistence for the row collection and global config
//!
//! The whole store and the config are serialized as JSON text under two
//! independent keys in a small key-value table, written after every
//! mutation and read once at startup.

use anyhow::Result;
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::pipeline::config::GlobalConfig;
use crate::pipeline::row::Row;

const ROWS_KEY: &str = "pipeline.rows";
const CONFIG_KEY: &str = "pipeline.config";

/// Key-value persistence wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Initialize the key-value schema.
    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Local::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Persist the whole row collection.
    pub fn save_rows(&self, rows: &[Row]) -> Result<()> {
        let json = serde_json::to_string(rows)?;
        self.put(ROWS_KEY, &json)
    }

    /// Load the row collection saved by the previous session, empty when
    /// nothing was saved yet.
    pub fn load_rows(&self) -> Result<Vec<Row>> {
        match self.get(ROWS_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Persist the global config under its own key.
    pub fn save_config(&self, config: &GlobalConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.put(CONFIG_KEY, &json)
    }

    /// Load the global config, falling back to defaults.
    pub fn load_config(&self) -> Result<GlobalConfig> {
        match self.get(CONFIG_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(GlobalConfig::default()),
        }
    }
}

/// Default per-user database location.
pub fn default_db_path() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("com", "picto-factory", "picto-factory") {
        proj_dirs.data_dir().join("pipeline.db")
    } else {
        PathBuf::from(".picto-factory.db")
    }
}
