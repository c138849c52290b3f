use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, SyncError};
use crate::domain::CoreData;
use crate::store::CoreStore;

const KEY_CURRENT_SUBSCRIPTIONS_FILE: &str = "current_subscriptions_file";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| SyncError::Config(format!("migration failed: {}", e)))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            SyncError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn read_record(conn: &Connection) -> Result<CoreData> {
        let raw: Option<String> = conn
            .query_row("SELECT data FROM core_data WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            None => Ok(CoreData::default()),
            Some(json) => Self::decode(&json),
        }
    }

    /// Corrupt records are fatal in debug builds and reset to defaults otherwise.
    fn decode(json: &str) -> Result<CoreData> {
        match serde_json::from_str(json) {
            Ok(data) => Ok(data),
            Err(e) if cfg!(debug_assertions) => Err(SyncError::Corrupt(e.to_string())),
            Err(e) => {
                tracing::error!("Stored core data is corrupt, using defaults: {}", e);
                Ok(CoreData::default())
            }
        }
    }

    fn read_path(conn: &Connection) -> Result<Option<PathBuf>> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![KEY_CURRENT_SUBSCRIPTIONS_FILE],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(PathBuf::from))
    }
}

impl CoreStore for SqliteStore {
    fn get(&self) -> Result<CoreData> {
        let conn = self.lock()?;
        let mut data = Self::read_record(&conn)?;
        data.subscriptions_path = Self::read_path(&conn)?;
        Ok(data)
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut CoreData)) -> Result<CoreData> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut data = Self::read_record(&tx)?;
        mutate(&mut data);
        let json = serde_json::to_string(&data)?;

        tx.execute(
            "INSERT INTO core_data (id, data, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![json, Utc::now().to_rfc3339()],
        )?;
        data.subscriptions_path = Self::read_path(&tx)?;
        tx.commit()?;

        Ok(data)
    }

    fn subscriptions_path(&self) -> Result<Option<PathBuf>> {
        let conn = self.lock()?;
        Self::read_path(&conn)
    }

    fn set_subscriptions_path(&self, path: Option<&Path>) -> Result<()> {
        let conn = self.lock()?;
        match path {
            Some(path) => {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![KEY_CURRENT_SUBSCRIPTIONS_FILE, path.to_string_lossy()],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM kv WHERE key = ?1",
                    params![KEY_CURRENT_SUBSCRIPTIONS_FILE],
                )?;
            }
        }
        Ok(())
    }
}
