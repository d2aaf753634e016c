//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    recipient_column: String,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/agrimarket/agrimarket.db`
    /// - macOS:   `~/Library/Application Support/com.agrimarket.agrimarket/agrimarket.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\agrimarket\agrimarket\data\agrimarket.db`
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Self::open_at(&default_path()?, config)
    }

    /// Open (or create) a database at an explicit path, creating missing
    /// parent directories.
    pub fn open_at(path: &Path, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::init(conn, config)
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::init(Connection::open_in_memory()?, config)
    }

    fn init(conn: Connection, config: &StoreConfig) -> Result<Self> {
        migrations::run_migrations(&conn, config)?;
        Ok(Self {
            conn,
            recipient_column: config.recipient_column.clone(),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Name of the recipient column in the `messages` table.
    pub fn recipient_column(&self) -> &str {
        &self.recipient_column
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

/// Platform data-directory location of the application database.
pub fn default_path() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "agrimarket", "agrimarket").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("agrimarket.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path, &StoreConfig::default()).expect("should open");
        assert!(db.path().is_some());
        assert_eq!(db.recipient_column(), "receiver_id");

        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("test.db");

        Database::open_at(&path, &StoreConfig::default()).expect("should open");
        assert!(path.exists());
    }

    #[test]
    fn reopen_does_not_rerun_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let config = StoreConfig::default();

        drop(Database::open_at(&path, &config).unwrap());
        Database::open_at(&path, &config).expect("second open should succeed");
    }

    #[test]
    fn invalid_config_is_rejected_before_opening() {
        let config = StoreConfig::default().with_recipient_column("bad column");
        assert!(matches!(
            Database::open_in_memory(&config),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
