//! Versioned, idempotent schema migrations.
//!
//! Every step inspects the live schema and only adds what is missing, so a
//! database written by any earlier build (or a partially migrated one) is
//! brought forward without touching existing rows. `PRAGMA user_version`
//! records the last applied step.

use rusqlite::{Connection, Transaction, params};
use tracing::debug;

/// One schema step.
pub(crate) struct Migration {
    pub version: i64,
    pub name: &'static str,
    apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "scan runs and file records",
        apply: create_base_tables,
    },
    Migration {
        version: 2,
        name: "run event log",
        apply: create_run_event,
    },
    Migration {
        version: 3,
        name: "run metadata and skip-resume marker",
        apply: add_run_metadata,
    },
    Migration {
        version: 4,
        name: "record lookup indexes",
        apply: create_indexes,
    },
    Migration {
        version: 5,
        name: "machine identity",
        apply: add_machine_identity,
    },
];

/// Latest schema version this build understands.
pub(crate) fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Columns every table must carry once migrations have run.
pub(crate) const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "scan_run",
        &[
            "id",
            "root",
            "started_at",
            "finished_at",
            "status",
            "options",
            "skip_resume",
            "hostname",
            "command_line",
            "current_dir",
            "hardware_id",
            "os_id",
            "database_path",
        ],
    ),
    (
        "file_record",
        &[
            "id",
            "scan_run_id",
            "path",
            "kind",
            "size",
            "mtime_ns",
            "device",
            "inode",
            "nlink",
            "content_hash",
            "link_target",
        ],
    ),
    ("run_event", &["id", "scan_run_id", "at", "message"]),
];

pub(crate) fn user_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Apply every step newer than the stored version. Returns the versions applied.
pub(crate) fn migrate(conn: &mut Connection) -> rusqlite::Result<Vec<i64>> {
    let current = user_version(conn)?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        debug!(version = migration.version, name = migration.name, "Applied migration");
        applied.push(migration.version);
    }

    Ok(applied)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn create_base_tables(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !table_exists(tx, "scan_run")? {
        tx.execute_batch(
            "CREATE TABLE scan_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root BLOB NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                options TEXT NOT NULL
            );",
        )?;
    }
    if !table_exists(tx, "file_record")? {
        tx.execute_batch(
            "CREATE TABLE file_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_run_id INTEGER NOT NULL REFERENCES scan_run(id),
                path BLOB NOT NULL,
                kind TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime_ns INTEGER NOT NULL,
                device INTEGER NOT NULL,
                inode INTEGER NOT NULL,
                nlink INTEGER NOT NULL,
                content_hash TEXT,
                link_target BLOB
            );",
        )?;
    }
    Ok(())
}

fn create_run_event(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !table_exists(tx, "run_event")? {
        tx.execute_batch(
            "CREATE TABLE run_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_run_id INTEGER NOT NULL REFERENCES scan_run(id),
                at TEXT NOT NULL,
                message TEXT NOT NULL
            );",
        )?;
    }
    Ok(())
}

fn add_run_metadata(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let columns = [
        ("skip_resume", "INTEGER NOT NULL DEFAULT 0"),
        ("hostname", "TEXT"),
        ("command_line", "TEXT"),
        ("current_dir", "BLOB"),
    ];
    for (column, decl) in columns {
        if !column_exists(tx, "scan_run", column)? {
            tx.execute_batch(&format!("ALTER TABLE scan_run ADD COLUMN {column} {decl};"))?;
        }
    }
    Ok(())
}

fn add_machine_identity(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let columns = [
        ("hardware_id", "TEXT"),
        ("os_id", "TEXT"),
        ("database_path", "BLOB"),
    ];
    for (column, decl) in columns {
        if !column_exists(tx, "scan_run", column)? {
            tx.execute_batch(&format!("ALTER TABLE scan_run ADD COLUMN {column} {decl};"))?;
        }
    }
    Ok(())
}

fn create_indexes(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_file_record_run_path
             ON file_record(scan_run_id, path);
         CREATE INDEX IF NOT EXISTS idx_file_record_run_size_hash
             ON file_record(scan_run_id, size, content_hash);
         CREATE INDEX IF NOT EXISTS idx_run_event_run
             ON run_event(scan_run_id);",
    )
}
