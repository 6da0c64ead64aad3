//! Scan run lifecycle.

use std::path::Path;

use chrono::Utc;
use filesage_core::{RunId, RunMetadata, RunOptions, RunSelector, RunStatus, ScanRun};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::codec::{conversion_error, path_from_blob, path_to_blob, time_from_sql, time_to_sql};
use crate::error::{Result, StoreError};
use crate::log::insert_event;
use crate::store::Store;

const RUN_COLUMNS: &str = "id, root, started_at, finished_at, status, options, \
                           skip_resume, hostname, command_line, current_dir, \
                           hardware_id, os_id, database_path";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRun> {
    let started_at: String = row.get(2)?;
    let finished_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let options: String = row.get(5)?;

    Ok(ScanRun {
        id: row.get(0)?,
        root: path_from_blob(row.get(1)?),
        started_at: time_from_sql(2, &started_at)?,
        finished_at: finished_at
            .as_deref()
            .map(|t| time_from_sql(3, t))
            .transpose()?,
        status: status
            .parse()
            .map_err(|e: String| conversion_error(4, Type::Text, std::io::Error::other(e)))?,
        options: serde_json::from_str(&options).map_err(|e| conversion_error(5, Type::Text, e))?,
        skip_resume: row.get(6)?,
        metadata: RunMetadata {
            hostname: row.get(7)?,
            command_line: row.get(8)?,
            current_dir: row.get::<_, Option<Vec<u8>>>(9)?.map(path_from_blob),
            hardware_id: row.get(10)?,
            os_id: row.get(11)?,
            database_path: row.get::<_, Option<Vec<u8>>>(12)?.map(path_from_blob),
        },
    })
}

impl Store {
    /// Insert a new run in `running` state and log its start.
    pub fn begin_run(
        &mut self,
        root: &Path,
        options: &RunOptions,
        metadata: &RunMetadata,
    ) -> Result<RunId> {
        let options_json = serde_json::to_string(options)?;
        let database_path = metadata
            .database_path
            .clone()
            .or_else(|| self.file_path());
        let now = Utc::now();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO scan_run (root, started_at, status, options, skip_resume, \
                                   hostname, command_line, current_dir, \
                                   hardware_id, os_id, database_path) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                path_to_blob(root),
                time_to_sql(now),
                RunStatus::Running.as_str(),
                options_json,
                metadata.hostname,
                metadata.command_line,
                metadata.current_dir.as_deref().map(path_to_blob),
                metadata.hardware_id,
                metadata.os_id,
                database_path.as_deref().map(path_to_blob),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let mut message = format!(
            "Started scan of {} (hashing {})",
            root.display(),
            if options.hashing_enabled { "on" } else { "off" }
        );
        if let Some(name) = &options.name {
            message.push_str(&format!(", name: {name}"));
        }
        if let Some(comment) = &options.comment {
            message.push_str(&format!(", comment: {comment}"));
        }
        insert_event(&tx, id, now, &message)?;
        tx.commit()?;

        info!(run_id = id, root = %root.display(), "Began scan run");
        Ok(id)
    }

    /// Load a run by id.
    pub fn get_run(&self, id: RunId) -> Result<ScanRun> {
        self.conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM scan_run WHERE id = ?1"),
                params![id],
                run_from_row,
            )
            .optional()?
            .ok_or(StoreError::RunNotFound(id))
    }

    /// All runs in id order.
    pub fn list_runs(&self) -> Result<Vec<ScanRun>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RUN_COLUMNS} FROM scan_run ORDER BY id"))?;
        let runs: Vec<ScanRun> = stmt.query_map([], run_from_row)?.collect::<rusqlite::Result<_>>()?;
        Ok(runs)
    }

    /// Unfinished runs eligible for resume, newest first, optionally for one root.
    pub fn incomplete_runs(&self, root: Option<&Path>) -> Result<Vec<ScanRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM scan_run \
             WHERE status IN ('running', 'resumed') AND skip_resume = 0 \
               AND (?1 IS NULL OR root = ?1) \
             ORDER BY id DESC"
        ))?;
        let runs: Vec<ScanRun> = stmt
            .query_map(params![root.map(path_to_blob)], run_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(runs)
    }

    /// Reopen an interrupted run.
    ///
    /// Completed, failed and skip-marked runs are rejected. On success the run
    /// is in `resumed` state and is returned with its original root and options.
    pub fn resume_run(&mut self, id: RunId) -> Result<ScanRun> {
        let mut run = self.get_run(id)?;
        if !run.is_resumable() {
            let reason = if run.status.is_terminal() {
                format!("run is {}", run.status)
            } else {
                "run is marked skip-resume".to_string()
            };
            return Err(StoreError::RunNotResumable { id, reason });
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE scan_run SET status = ?1 WHERE id = ?2",
            params![RunStatus::Resumed.as_str(), id],
        )?;
        insert_event(&tx, id, now, &format!("Resumed scan (was {})", run.status))?;
        tx.commit()?;

        info!(run_id = id, "Resumed scan run");
        run.status = RunStatus::Resumed;
        Ok(run)
    }

    /// Move a run to `next`, enforcing the run state machine.
    pub fn transition(&mut self, id: RunId, next: RunStatus) -> Result<()> {
        let run = self.get_run(id)?;
        if !run.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: run.status,
                to: next,
            });
        }
        self.conn.execute(
            "UPDATE scan_run SET status = ?1 WHERE id = ?2",
            params![next.as_str(), id],
        )?;
        debug!(run_id = id, from = %run.status, to = %next, "Run status changed");
        Ok(())
    }

    /// Finalize a run with a terminal status and its finish time.
    pub fn finish_run(&mut self, id: RunId, status: RunStatus) -> Result<()> {
        let run = self.get_run(id)?;
        if !status.is_terminal() || !run.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: run.status,
                to: status,
            });
        }
        self.conn.execute(
            "UPDATE scan_run SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), time_to_sql(Utc::now()), id],
        )?;
        info!(run_id = id, status = %status, "Finished scan run");
        Ok(())
    }

    /// Exclude a run from auto-resume and manual resume.
    pub fn mark_skip_resume(&mut self, id: RunId) -> Result<()> {
        let run = self.get_run(id)?;
        if run.skip_resume {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE scan_run SET skip_resume = 1 WHERE id = ?1",
            params![id],
        )?;
        insert_event(&tx, id, Utc::now(), "Marked skip-resume")?;
        tx.commit()?;
        info!(run_id = id, "Marked run skip-resume");
        Ok(())
    }

    /// Resolve a selector to a run.
    ///
    /// `Latest` is the most recent completed run with hashing enabled.
    pub fn resolve_run(&self, selector: RunSelector) -> Result<ScanRun> {
        match selector {
            RunSelector::Id(id) => self.get_run(id),
            RunSelector::Latest => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM scan_run WHERE status = 'completed' ORDER BY id DESC"
                ))?;
                let mut rows = stmt.query_map([], run_from_row)?;
                while let Some(run) = rows.next().transpose()? {
                    if run.options.hashing_enabled {
                        return Ok(run);
                    }
                }
                Err(StoreError::NoEligibleRun)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed() -> RunOptions {
        RunOptions {
            hashing_enabled: true,
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_begin_and_get() {
        let mut store = Store::open_in_memory().unwrap();
        let metadata = RunMetadata {
            hostname: Some("box".into()),
            command_line: Some("filesage scan /data".into()),
            current_dir: None,
            hardware_id: Some("0123456789abcdef".into()),
            os_id: Some("debian".into()),
            database_path: Some("/var/lib/filesage/store.db".into()),
        };
        let id = store.begin_run(Path::new("/data"), &hashed(), &metadata).unwrap();

        let run = store.get_run(id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.root, Path::new("/data"));
        assert!(run.finished_at.is_none());
        assert!(run.options.hashing_enabled);
        assert_eq!(run.metadata, metadata);
    }

    #[test]
    fn test_in_memory_store_records_no_database_path() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store.begin_run(Path::new("/data"), &hashed(), &RunMetadata::default()).unwrap();
        assert!(store.get_run(id).unwrap().metadata.database_path.is_none());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut store = Store::open_in_memory().unwrap();
        let a = store.begin_run(Path::new("/a"), &hashed(), &RunMetadata::default()).unwrap();
        let b = store.begin_run(Path::new("/b"), &hashed(), &RunMetadata::default()).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store.begin_run(Path::new("/a"), &hashed(), &RunMetadata::default()).unwrap();

        assert!(matches!(
            store.finish_run(id, RunStatus::Resumed),
            Err(StoreError::InvalidTransition { .. })
        ));
        store.finish_run(id, RunStatus::Completed).unwrap();
        assert!(store.get_run(id).unwrap().finished_at.is_some());
        assert!(matches!(
            store.finish_run(id, RunStatus::Failed),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_finish_unknown_run() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.finish_run(99, RunStatus::Completed),
            Err(StoreError::RunNotFound(99))
        ));
    }

    #[test]
    fn test_latest_skips_unhashed_runs() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(store.resolve_run(RunSelector::Latest), Err(StoreError::NoEligibleRun)));

        let hashed_id = store.begin_run(Path::new("/a"), &hashed(), &RunMetadata::default()).unwrap();
        store.finish_run(hashed_id, RunStatus::Completed).unwrap();
        let plain = store
            .begin_run(Path::new("/a"), &RunOptions::default(), &RunMetadata::default())
            .unwrap();
        store.finish_run(plain, RunStatus::Completed).unwrap();
        let running = store.begin_run(Path::new("/a"), &hashed(), &RunMetadata::default()).unwrap();

        let latest = store.resolve_run(RunSelector::Latest).unwrap();
        assert_eq!(latest.id, hashed_id);
        assert_ne!(latest.id, running);
    }

    #[test]
    fn test_incomplete_runs_by_root() {
        let mut store = Store::open_in_memory().unwrap();
        let a = store.begin_run(Path::new("/a"), &hashed(), &RunMetadata::default()).unwrap();
        let b = store.begin_run(Path::new("/b"), &hashed(), &RunMetadata::default()).unwrap();
        store.mark_skip_resume(b).unwrap();

        let for_a: Vec<_> = store
            .incomplete_runs(Some(Path::new("/a")))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(for_a, vec![a]);
        assert!(store.incomplete_runs(Some(Path::new("/b"))).unwrap().is_empty());
        assert_eq!(store.incomplete_runs(None).unwrap().len(), 1);
    }
}
