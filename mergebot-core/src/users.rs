use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

const USER_SCHEMA: &str = include_str!("../../sql/users.sql");

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("failed to open user database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on user database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("user store path not configured")]
    MissingStore,
}

pub type UserStoreResult<T> = Result<T, UserStoreError>;

/// A chat user record. `premium` is written only through the admin
/// surface; the pipeline never flips it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub premium: bool,
}

#[derive(Debug, Clone)]
pub struct SqliteUserStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteUserStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteUserStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> UserStoreResult<SqliteUserStore> {
        let path = self.path.ok_or(UserStoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteUserStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteUserStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteUserStore {
    pub fn builder() -> SqliteUserStoreBuilder {
        SqliteUserStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> UserStoreResult<Self> {
        SqliteUserStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> UserStoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            UserStoreError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA busy_timeout = 5000;\n",
        )
        .map_err(|source| UserStoreError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> UserStoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(USER_SCHEMA)?;
        Ok(())
    }

    /// Fetches the record for `id`, inserting a non-premium one if the
    /// user has never been seen.
    pub fn get_or_create(&self, id: i64) -> UserStoreResult<UserRecord> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id, premium) VALUES (?1, 0)",
            params![id],
        )?;
        let record = conn
            .query_row(
                "SELECT id, premium FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        premium: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()?;
        record.ok_or_else(|| {
            UserStoreError::Execute(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    pub fn set_premium(&self, id: i64, premium: bool) -> UserStoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO users (id, premium, updated_at) VALUES (?1, ?2, ?3)\n\
             ON CONFLICT(id) DO UPDATE SET premium = excluded.premium,\n\
                                           updated_at = excluded.updated_at",
            params![id, premium as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_all(&self) -> UserStoreResult<Vec<UserRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, premium FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                premium: row.get::<_, i64>(1)? != 0,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
