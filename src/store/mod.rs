//! Embedded single-file work queue store.
//!
//! Each worker opens its own [`rusqlite::Connection`] via [`open`]; connections
//! are never shared between workers. Schema bootstrap happens once, from the
//! orchestrator, before any worker connects.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a connection to the work queue, configured for WAL concurrency.
///
/// Mirrors the pragma set the crawl repository uses for its SQLite store:
/// WAL journaling so readers never block the writer, a 5s busy wait on
/// write-lock contention, reduced fsync discipline under WAL, and a ~64MiB
/// page cache per handle.
pub fn open(path: &Path, readonly: bool) -> Result<Connection> {
    let conn = if readonly {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    } else {
        Connection::open(path)
    }
    .inspect_err(|_| {
        #[cfg(unix)]
        log_open_diagnostics(path);
    })?;

    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -65536;
        PRAGMA foreign_keys = ON;
        "#,
    )?;

    Ok(conn)
}

/// Bootstrap the work_queue schema. Idempotent; safe to call once at startup.
pub fn init_schema(path: &Path) -> Result<()> {
    let conn = open(path, false)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS work_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            processed_at TEXT,
            result_1_body TEXT,
            result_1_status INTEGER,
            result_1_duration_ms REAL,
            result_2_body TEXT,
            result_2_status INTEGER,
            result_2_duration_ms REAL,
            result_3_body TEXT,
            result_3_status INTEGER,
            result_3_duration_ms REAL
        );

        CREATE INDEX IF NOT EXISTS idx_work_queue_status ON work_queue(status);
        "#,
    )?;
    Ok(())
}

/// Remove a stale queue file and its WAL/SHM auxiliaries from a prior run.
pub fn reset(path: &Path) -> Result<()> {
    for candidate in [
        path.to_path_buf(),
        append_suffix(path, "-wal"),
        append_suffix(path, "-shm"),
        append_suffix(path, "-journal"),
    ] {
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Log uid/gid and parent-directory ownership when opening the queue file
/// fails, to make permission problems obvious in the field (Unix only).
#[cfg(unix)]
fn log_open_diagnostics(path: &Path) {
    use std::os::unix::fs::MetadataExt;

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    tracing::debug!(path = %path.display(), uid, gid, "queue open failed, running as");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(meta) = std::fs::metadata(parent) {
            tracing::debug!(
                parent = %parent.display(),
                owner_uid = meta.uid(),
                owner_gid = meta.gid(),
                mode = format!("{:o}", meta.mode() & 0o7777),
                "queue directory ownership"
            );
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_sets_wal_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        init_schema(&path).unwrap();

        let conn = open(&path, false).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn reset_removes_stale_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        init_schema(&path).unwrap();
        assert!(path.exists());

        reset(&path).unwrap();
        assert!(!path.exists());

        // Reset on an already-absent file is a no-op, not an error.
        reset(&path).unwrap();
    }

    #[test]
    fn init_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        init_schema(&path).unwrap();
        init_schema(&path).unwrap();
    }
}
