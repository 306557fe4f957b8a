//! SQLite implementation of the `extstore-core` store contracts.
//!
//! The version stamp lives in SQLite's `PRAGMA user_version`, so a freshly
//! copied payload already carries whatever version its producer encoded.
//! Read-only handles use `SQLITE_OPEN_READ_ONLY` and therefore can never
//! create the file as a side effect; every open runs a probe query against
//! `sqlite_master` so that a payload which is not a valid database fails at
//! open rather than at first use.

use std::path::{Path, PathBuf};

use anyhow::Context;
use extstore_core::{OpenMode, StoreEngine, StoreError, StoreHandle};
use rusqlite::{Connection, OpenFlags};

/// Store engine backed by SQLite files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

impl SqliteEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StoreEngine for SqliteEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn StoreHandle>, StoreError> {
        let conn = open_connection(path, mode).map_err(StoreError::new)?;
        Ok(Box::new(SqliteHandle {
            conn,
            path: path.to_path_buf(),
        }))
    }
}

fn open_connection(path: &Path, mode: OpenMode) -> anyhow::Result<Connection> {
    let flags = match mode {
        OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        OpenMode::ReadWrite => {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        }
    };
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("failed to open sqlite store at {}", path.display()))?;

    conn.execute_batch("PRAGMA busy_timeout = 5000;")
        .context("failed to configure sqlite pragmas")?;

    // Probe the schema so a file that is not an SQLite database is
    // rejected here instead of on first statement.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .with_context(|| format!("{} is not a valid sqlite store", path.display()))?;

    Ok(conn)
}

/// One open connection to a store file.
pub struct SqliteHandle {
    conn: Connection,
    path: PathBuf,
}

impl StoreHandle for SqliteHandle {
    fn version(&mut self) -> Result<i64, StoreError> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .with_context(|| format!("failed to read user_version of {}", self.path.display()))
            .map_err(StoreError::new)
    }

    fn set_version(&mut self, version: i64) -> Result<(), StoreError> {
        self.conn
            .pragma_update(None, "user_version", version)
            .with_context(|| format!("failed to set user_version of {}", self.path.display()))
            .map_err(StoreError::new)
    }

    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE;")
            .context("failed to begin transaction")
            .map_err(StoreError::new)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("COMMIT;")
            .context("failed to commit transaction")
            .map_err(StoreError::new)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("ROLLBACK;")
            .context("failed to roll back transaction")
            .map_err(StoreError::new)
    }

    fn execute(&mut self, statements: &str) -> Result<(), StoreError> {
        self.conn
            .execute_batch(statements)
            .with_context(|| format!("statement execution failed on {}", self.path.display()))
            .map_err(StoreError::new)
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.conn
            .close()
            .map_err(|(_conn, err)| StoreError::new(err))
    }
}
