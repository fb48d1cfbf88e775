// crates/oracle-server/src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Database access always goes through `interact` (anyhow::Result, internal
// plumbing) or `run` (OracleError, operation handlers). Both execute the
// closure on a blocking thread so SQLite work never stalls the async loop.

use crate::error::OracleError;
use crate::utils::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

/// Registers sqlite-vec extension globally (once per process).
/// Must be called before any SQLite connections are opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature expected by
        // sqlite3_auto_extension; the pointer targets a statically-linked
        // symbol and stays valid for the process lifetime.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if an OracleError wraps a SQLite contention error.
fn is_oracle_contention(err: &OracleError) -> bool {
    match err {
        OracleError::Db(rusqlite_err) => is_rusqlite_contention(rusqlite_err),
        _ => false,
    }
}

/// Check if an anyhow::Error chain contains a SQLite contention error.
fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    if let Some(rusqlite_err) = err.downcast_ref::<rusqlite::Error>() {
        return is_rusqlite_contention(rusqlite_err);
    }
    if let Some(oracle_err) = err.downcast_ref::<OracleError>() {
        return is_oracle_contention(oracle_err);
    }
    false
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Generic retry-with-backoff for async operations that may encounter
/// SQLite contention.
async fn retry_with_backoff<F, Fut, R, E>(
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    E: std::fmt::Display,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }

    op().await
}

/// Database pool wrapper with sqlite-vec support and per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_sqlite_vec_registered();
        ensure_parent_directory(path)?;

        let conn_str = path_to_string(path);
        let db_pool = Self::build(&conn_str, Some(path.to_path_buf()), None, true)?;
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared cache URI so all pool connections see the same
    /// in-memory database; without it every connection would get its own.
    pub async fn open_in_memory() -> Result<Self> {
        ensure_sqlite_vec_registered();

        let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let db_pool = Self::build(&uri, None, Some(uri.clone()), false)?;
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    fn build(
        conn_str: &str,
        path: Option<PathBuf>,
        memory_uri: Option<String>,
        file_backed: bool,
    ) -> Result<Self> {
        // WAL only makes sense for file-backed databases
        let pragmas: &'static str = if file_backed {
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000;"
        } else {
            "PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000;"
        };
        let hook = Hook::async_fn(move |conn, _metrics| {
            Box::pin(async move {
                conn.interact(|conn| {
                    conn.execute_batch(pragmas)?;
                    Ok::<_, rusqlite::Error>(())
                })
                .await
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
                })?
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(
                        format!("connection setup failed: {e}").into(),
                    )
                })
            })
        });

        let cfg = Config::new(conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        Ok(Self {
            pool,
            path,
            memory_uri,
        })
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// The closure runs on a blocking thread pool, so it won't block the
    /// async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors at debug but
    /// not propagating. For best-effort operations only.
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure and return `Result<T, OracleError>` for operation
    /// handlers. Handles all the error conversion boilerplate in one place.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, OracleError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<OracleError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| OracleError::Internal(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| OracleError::Internal(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but with retry on SQLite contention errors.
    ///
    /// Use for critical writes that must not be lost (context-tree appends,
    /// delta status transitions). The closure must be `Clone` to support
    /// retries.
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, OracleError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<OracleError> + Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.run(f_clone)
            },
            is_oracle_contention,
        )
        .await
    }

    /// Run a closure with retry on SQLite contention errors, returning
    /// `anyhow::Result` for internal plumbing.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.interact(f_clone)
            },
            |e: &anyhow::Error| is_sqlite_contention(e),
        )
        .await
    }

    /// Run schema migrations on a dedicated connection.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| crate::db::schema::run_migrations(conn))
            .await
            .context("Schema migrations failed")
    }
}

/// Create the parent directory of a database file if missing
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
