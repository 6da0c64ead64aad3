//! Append-only file records and the duplicate candidate query.

use filesage_core::{
    ContentHash, DuplicateGroup, DuplicateMember, EntryKind, FileRecord, InodeInfo, RunId,
    RunSelector, ScanRun, mtime_from_nanos, mtime_to_nanos,
};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tracing::debug;

use crate::codec::{conversion_error, path_from_blob, path_to_blob, u64_from_sql, u64_to_sql};
use crate::error::{Result, StoreError};
use crate::store::Store;

const INSERT_RECORD: &str = "INSERT INTO file_record \
    (scan_run_id, path, kind, size, mtime_ns, device, inode, nlink, content_hash, link_target) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// Candidate rows for duplicate grouping: the newest row per path of one
/// run, regular files with a hash, at least `?2` bytes, sharing
/// (size, hash) with at least one other path.
const DUPLICATE_CANDIDATES: &str = "
    WITH latest AS (
        SELECT MAX(id) AS id FROM file_record WHERE scan_run_id = ?1 GROUP BY path
    ),
    current AS (
        SELECT f.* FROM file_record f JOIN latest l ON f.id = l.id
        WHERE f.kind = 'file' AND f.content_hash IS NOT NULL AND f.size >= ?2
    ),
    dups AS (
        SELECT size, content_hash FROM current
        GROUP BY size, content_hash HAVING COUNT(*) > 1
    )
    SELECT c.size, c.content_hash, c.path, c.device, c.inode, c.nlink, c.mtime_ns
    FROM current c JOIN dups d ON c.size = d.size AND c.content_hash = d.content_hash
    ORDER BY c.size, c.content_hash, c.path";

/// Newest row per path of one run, regular files with a hash, by path.
const HASHED_FILES: &str = "
    WITH latest AS (
        SELECT MAX(id) AS id FROM file_record WHERE scan_run_id = ?1 GROUP BY path
    )
    SELECT f.scan_run_id, f.path, f.kind, f.size, f.mtime_ns, f.device, f.inode, f.nlink,
           f.content_hash, f.link_target
    FROM file_record f JOIN latest l ON f.id = l.id
    WHERE f.kind = 'file' AND f.content_hash IS NOT NULL
    ORDER BY f.path";

fn insert_record(conn: &Connection, record: &FileRecord) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_RECORD)?;
    stmt.execute(params![
        record.scan_run_id,
        path_to_blob(&record.path),
        record.kind.as_str(),
        u64_to_sql(record.size),
        mtime_to_nanos(record.mtime),
        u64_to_sql(record.inode.device),
        u64_to_sql(record.inode.inode),
        u64_to_sql(record.nlink),
        record.content_hash.map(|h| h.to_hex()),
        record.link_target.as_deref().map(path_to_blob),
    ])?;
    Ok(())
}

fn hash_from_sql(idx: usize, hex: Option<String>) -> rusqlite::Result<Option<ContentHash>> {
    hex.map(|h| ContentHash::from_hex(&h).map_err(|e| conversion_error(idx, Type::Text, e)))
        .transpose()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let kind: String = row.get(2)?;
    Ok(FileRecord {
        scan_run_id: row.get(0)?,
        path: path_from_blob(row.get(1)?),
        kind: kind
            .parse::<EntryKind>()
            .map_err(|e| conversion_error(2, Type::Text, std::io::Error::other(e)))?,
        size: u64_from_sql(row.get(3)?),
        mtime: mtime_from_nanos(row.get(4)?),
        inode: InodeInfo::new(u64_from_sql(row.get(6)?), u64_from_sql(row.get(5)?)),
        nlink: u64_from_sql(row.get(7)?),
        content_hash: hash_from_sql(8, row.get(8)?)?,
        link_target: row.get::<_, Option<Vec<u8>>>(9)?.map(path_from_blob),
    })
}

impl Store {
    /// Append one record. The insert is atomic.
    pub fn record_file(&mut self, record: &FileRecord) -> Result<()> {
        insert_record(&self.conn, record)?;
        Ok(())
    }

    /// Append a batch of records in a single transaction.
    pub fn record_files(&mut self, records: &[FileRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;
        debug!(count = records.len(), "Recorded file batch");
        Ok(records.len())
    }

    /// Number of rows stored for a run, including superseded ones.
    pub fn count_records(&self, run_id: RunId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM file_record WHERE scan_run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// All rows of a run in insertion order.
    pub fn records_for_run(&self, run_id: RunId) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT scan_run_id, path, kind, size, mtime_ns, device, inode, nlink, \
                    content_hash, link_target \
             FROM file_record WHERE scan_run_id = ?1 ORDER BY id",
        )?;
        let records: Vec<FileRecord> = stmt
            .query_map(params![run_id], record_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(records)
    }

    /// Current hashed files of the selected run, ordered by path.
    ///
    /// Superseded rows left by a resume are skipped. Runs recorded without
    /// hashing are rejected with [`StoreError::HashingDisabled`].
    pub fn hashed_files(&self, selector: RunSelector) -> Result<(ScanRun, Vec<FileRecord>)> {
        let run = self.resolve_run(selector)?;
        if !run.options.hashing_enabled {
            return Err(StoreError::HashingDisabled(run.id));
        }

        let mut stmt = self.conn.prepare(HASHED_FILES)?;
        let records: Vec<FileRecord> = stmt
            .query_map(params![run.id], record_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        debug!(run_id = run.id, files = records.len(), "Queried hashed files");
        Ok((run, records))
    }

    /// Candidate duplicate groups for the selected run.
    ///
    /// Groups are ordered by size then hash, members by path. Runs recorded
    /// without hashing are rejected with [`StoreError::HashingDisabled`].
    pub fn query_duplicates(
        &self,
        selector: RunSelector,
        min_size: u64,
    ) -> Result<(ScanRun, Vec<DuplicateGroup>)> {
        let run = self.resolve_run(selector)?;
        if !run.options.hashing_enabled {
            return Err(StoreError::HashingDisabled(run.id));
        }

        let mut stmt = self.conn.prepare(DUPLICATE_CANDIDATES)?;
        let rows = stmt.query_map(
            params![run.id, i64::try_from(min_size).unwrap_or(i64::MAX)],
            |row| {
                let size = u64_from_sql(row.get(0)?);
                let hash = hash_from_sql(1, row.get(1)?)?;
                let member = DuplicateMember {
                    path: path_from_blob(row.get(2)?),
                    inode: InodeInfo::new(u64_from_sql(row.get(4)?), u64_from_sql(row.get(3)?)),
                    nlink: u64_from_sql(row.get(5)?),
                    mtime: mtime_from_nanos(row.get(6)?),
                };
                Ok((size, hash, member))
            },
        )?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let (size, hash, member) = row?;
            let Some(hash) = hash else { continue };
            match groups.last_mut() {
                Some(group) if group.size == size && group.content_hash == hash => {
                    group.members.push(member);
                }
                _ => groups.push(DuplicateGroup::new(size, hash, vec![member])),
            }
        }

        debug!(run_id = run.id, groups = groups.len(), "Queried duplicate candidates");
        Ok((run, groups))
    }
}
