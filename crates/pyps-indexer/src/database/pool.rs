//! Bounded pool of SQLite connections.

use crate::IndexerError;
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::schema::BUILD_TABLE;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed-size pool of reusable connections.
///
/// Connections are opened lazily up to `max_connections`; further callers
/// block until a handle is returned.
pub struct ConnectionPool {
    path: PathBuf,
    read_only: bool,
    max_connections: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
    closed: bool,
}

impl ConnectionPool {
    pub fn new(path: &Path, read_only: bool, max_connections: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            read_only,
            max_connections: max_connections.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                closed: false,
            }),
            returned: Condvar::new(),
        }
    }

    /// Run `f` with a checked out connection, opening one if the pool has room.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, IndexerError>,
    ) -> Result<T, IndexerError> {
        let mut conn = self.checkout()?;
        let mut lease = Lease {
            pool: self,
            returned: false,
        };
        let result = f(&mut conn);
        lease.returned = true;
        self.put_back(conn);
        result
    }

    fn checkout(&self) -> Result<Connection, IndexerError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(IndexerError::Closed);
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < self.max_connections {
                state.open += 1;
                drop(state);
                return self.connect().inspect_err(|_| self.forget());
            }
            self.returned.wait(&mut state);
        }
    }

    /// Number of connections currently open (idle or in use).
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Close idle connections and refuse new checkouts.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open -= idle.len();
        drop(state);
        drop(idle);
        self.returned.notify_all();
    }

    fn connect(&self) -> Result<Connection, IndexerError> {
        let conn = if self.read_only {
            Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&self.path)?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "Configured journal");
            conn.execute_batch(BUILD_TABLE)?;
            conn
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;

        debug!(path = ?self.path, read_only = self.read_only, "Opened database connection");
        Ok(conn)
    }

    fn forget(&self) {
        self.state.lock().open -= 1;
        self.returned.notify_one();
    }

    fn put_back(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.closed {
            state.open -= 1;
        } else {
            state.idle.push(conn);
        }
        drop(state);
        self.returned.notify_one();
    }
}

/// Releases the slot of a connection lost to a panic.
struct Lease<'a> {
    pool: &'a ConnectionPool,
    returned: bool,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn select_one(conn: &mut Connection) -> Result<i64, IndexerError> {
        Ok(conn.query_row("SELECT 1", [], |r| r.get(0))?)
    }

    #[test]
    fn test_pool_reuses_connections() {
        let temp_dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&temp_dir.path().join("db.sqlite"), false, 2);

        assert_eq!(pool.with(select_one).unwrap(), 1);
        assert_eq!(pool.with(select_one).unwrap(), 1);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn test_pool_blocks_at_capacity() {
        let temp_dir = tempdir().unwrap();
        let pool = Arc::new(ConnectionPool::new(
            &temp_dir.path().join("db.sqlite"),
            false,
            1,
        ));

        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                pool.with(|_| {
                    held_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap()
            })
        };
        held_rx.recv().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.with(select_one).unwrap())
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        release_tx.send(()).unwrap();

        holder.join().unwrap();
        assert_eq!(waiter.join().unwrap(), 1);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn test_read_only_pool_requires_existing_file() {
        let temp_dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&temp_dir.path().join("missing.sqlite"), true, 1);
        assert!(pool.with(select_one).is_err());
        assert_eq!(pool.open_connections(), 0);
    }

    #[test]
    fn test_errors_return_connection() {
        let temp_dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&temp_dir.path().join("db.sqlite"), false, 1);

        let result: Result<(), _> = pool.with(|_| Err(IndexerError::Closed));
        assert!(result.is_err());
        assert_eq!(pool.with(select_one).unwrap(), 1);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn test_closed_pool_refuses_checkout() {
        let temp_dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&temp_dir.path().join("db.sqlite"), false, 1);
        pool.with(select_one).unwrap();

        pool.close();
        assert!(matches!(pool.with(select_one), Err(IndexerError::Closed)));
        assert_eq!(pool.open_connections(), 0);
    }
}
