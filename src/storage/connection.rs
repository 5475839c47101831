//! Shared database handle (§5): one connection, owned by the storage layer
//! and shared across the graph, vector, memory, and document-tracker
//! components. In-memory databases are restricted to this single
//! connection to preserve visibility across components, exactly as §5
//! requires; file-backed databases could be pooled, but a single
//! serialized connection is the simplest implementation that satisfies
//! every concurrency requirement in the spec (short transactions, no
//! locks held across I/O) without introducing pool-coordination bugs.

use std::path::Path;
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::Connection;

use super::migrations::run_migrations;
use crate::error::Result;

static VEC_EXTENSION_REGISTERED: Once = Once::new();

/// Register the `sqlite-vec` `vec0` virtual table module process-wide.
/// `sqlite3_auto_extension` applies to every connection opened after this
/// call, so it only needs to run once regardless of how many `Storage`
/// instances exist.
pub(crate) fn ensure_vec_extension_registered() {
    VEC_EXTENSION_REGISTERED.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(),
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    });
}

/// Owned database handle. Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct Storage {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(db_path: impl Into<String>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Self::create_connection(&db_path)?;
        run_migrations(&conn)?;
        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn create_connection(db_path: &str) -> Result<Connection> {
        ensure_vec_extension_registered();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(db_path)?
        };

        Self::configure_pragmas(&conn, db_path)?;
        Ok(conn)
    }

    fn configure_pragmas(conn: &Connection, db_path: &str) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        if db_path != ":memory:" {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=30000;
                "#,
            )?;
        }
        Ok(())
    }

    /// Run `f` against the raw connection without wrapping a transaction.
    /// Used for reads and for operations that are already a single
    /// statement (upserts via `ON CONFLICT`).
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a short serializable transaction, committing on `Ok`
    /// and rolling back (via drop) on `Err`.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_runs_migrations() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
        let count: i64 = storage
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let storage = Storage::open_in_memory().unwrap();
        let result: Result<()> = storage.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO processed_documents (hash, source, processed_at, chunk_count) VALUES ('h','s','2024-01-01T00:00:00Z',1)",
                [],
            )?;
            Err(crate::error::EngramError::Validation("force rollback".into()))
        });
        assert!(result.is_err());
        let count: i64 = storage
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM processed_documents", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
