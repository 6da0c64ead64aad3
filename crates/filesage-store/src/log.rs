//! Per-run event log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use filesage_core::RunId;
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::codec::{time_from_sql, time_to_sql};
use crate::error::{Result, StoreError};
use crate::store::Store;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One stored log line of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunEvent {
    pub scan_run_id: RunId,
    pub at: DateTime<Utc>,
    pub message: String,
}

impl RunEvent {
    /// Render as `[YYYY-MM-DD HH:MM:SS] message`.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.at.format(TIMESTAMP_FORMAT), self.message)
    }
}

/// Which runs [`Store::print_log`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSelector {
    All,
    Run(RunId),
}

pub(crate) fn insert_event(
    conn: &Connection,
    run_id: RunId,
    at: DateTime<Utc>,
    message: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO run_event (scan_run_id, at, message) VALUES (?1, ?2, ?3)",
        params![run_id, time_to_sql(at), message],
    )?;
    Ok(())
}

impl Store {
    /// Append a timestamped line to a run's log.
    pub fn append_log(&self, run_id: RunId, message: &str) -> Result<()> {
        if !self.run_exists(run_id)? {
            return Err(StoreError::RunNotFound(run_id));
        }
        insert_event(&self.conn, run_id, Utc::now(), message)?;
        Ok(())
    }

    /// Events of one run in insertion order.
    pub fn events(&self, run_id: RunId) -> Result<Vec<RunEvent>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT scan_run_id, at, message FROM run_event WHERE scan_run_id = ?1 ORDER BY id",
        )?;
        let events: Vec<RunEvent> = stmt
            .query_map(params![run_id], |row| {
                let at: String = row.get(1)?;
                Ok(RunEvent {
                    scan_run_id: row.get(0)?,
                    at: time_from_sql(1, &at)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(events)
    }

    /// Lines of the log for one run or every run, produced run by run.
    ///
    /// Each run starts with a header line; runs without events print
    /// `(no log entries)`; runs are separated by a blank line.
    pub fn print_log(&self, selector: LogSelector) -> Result<LogLines<'_>> {
        let run_ids: VecDeque<RunId> = match selector {
            LogSelector::Run(id) => {
                if !self.run_exists(id)? {
                    return Err(StoreError::RunNotFound(id));
                }
                VecDeque::from([id])
            }
            LogSelector::All => {
                let mut stmt = self.conn.prepare("SELECT id FROM scan_run ORDER BY id")?;
                let ids: VecDeque<RunId> = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                ids
            }
        };

        Ok(LogLines {
            store: self,
            run_ids,
            pending: VecDeque::new(),
            started: false,
            failed: false,
        })
    }

    fn run_exists(&self, id: RunId) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scan_run WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }
}

/// Lazy iterator returned by [`Store::print_log`].
pub struct LogLines<'a> {
    store: &'a Store,
    run_ids: VecDeque<RunId>,
    pending: VecDeque<String>,
    started: bool,
    failed: bool,
}

impl LogLines<'_> {
    fn load_run(&mut self, id: RunId) -> Result<()> {
        let run = self.store.get_run(id)?;
        let events = self.store.events(id)?;

        if self.started {
            self.pending.push_back(String::new());
        }
        self.started = true;

        self.pending.push_back(format!(
            "=== run id={} started_at={} root={} status={} ===",
            run.id,
            run.started_at.format(TIMESTAMP_FORMAT),
            run.root.display(),
            run.status
        ));
        if events.is_empty() {
            self.pending.push_back("(no log entries)".to_string());
        } else {
            self.pending.extend(events.iter().map(RunEvent::render));
        }
        Ok(())
    }
}

impl Iterator for LogLines<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            let id = self.run_ids.pop_front()?;
            if let Err(e) = self.load_run(id) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}
