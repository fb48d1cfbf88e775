// crates/oracle-server/src/db/delta.rs
// Delta queue storage: pending change rows with per-file coalescing

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use strum::{Display, EnumString};

/// Kind of detected file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// Lifecycle of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

/// One queued file change
#[derive(Debug, Clone)]
pub struct DeltaEntry {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub change_type: ChangeType,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub lines_changed: i64,
    pub detected_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub error: Option<String>,
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeltaEntry> {
    let change_type: String = row.get(3)?;
    let status: String = row.get(8)?;
    let detected_at: String = row.get(7)?;
    Ok(DeltaEntry {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_path: row.get(2)?,
        change_type: change_type.parse().unwrap_or(ChangeType::Modified),
        old_hash: row.get(4)?,
        new_hash: row.get(5)?,
        lines_changed: row.get(6)?,
        detected_at: detected_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        status: status.parse().unwrap_or(EntryStatus::Pending),
        error: row.get(9)?,
    })
}

const ENTRY_COLUMNS: &str = "id, project_id, file_path, change_type, old_hash, new_hash, \
     lines_changed, detected_at, status, error";

/// Enqueue a change, coalescing with any pending entry for the same path.
///
/// Rules:
/// - later entry supersedes, preserving the original detected_at so
///   age-based thresholds fire on the oldest observation
/// - `deleted` over a pending `added` nets out to nothing (the index
///   never saw the file) and the entry is removed
/// - `deleted` over a pending `modified` becomes `deleted`
/// - a new create over a pending `deleted` becomes `modified`
///
/// Returns the id of the surviving entry, or None when the change
/// cancelled out.
pub fn enqueue_change_sync(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
    change_type: ChangeType,
    old_hash: Option<&str>,
    new_hash: Option<&str>,
    lines_changed: i64,
) -> Result<Option<String>> {
    let existing = conn
        .query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM delta_queue
                 WHERE project_id = ?1 AND file_path = ?2 AND status = 'pending'"
            ),
            params![project_id, file_path],
            entry_from_row,
        )
        .optional()?;

    let Some(existing) = existing else {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO delta_queue
                 (id, project_id, file_path, change_type, old_hash, new_hash,
                  lines_changed, detected_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
            params![
                id,
                project_id,
                file_path,
                change_type.to_string(),
                old_hash,
                new_hash,
                lines_changed,
                Utc::now().to_rfc3339(),
            ],
        )?;
        return Ok(Some(id));
    };

    let merged = match (existing.change_type, change_type) {
        (ChangeType::Added, ChangeType::Deleted) => None,
        (_, ChangeType::Deleted) => Some(ChangeType::Deleted),
        (ChangeType::Deleted, ChangeType::Added | ChangeType::Modified) => {
            Some(ChangeType::Modified)
        }
        (ChangeType::Added, _) => Some(ChangeType::Added),
        (_, new_type) => Some(new_type),
    };

    match merged {
        None => {
            conn.execute("DELETE FROM delta_queue WHERE id = ?1", params![existing.id])?;
            Ok(None)
        }
        Some(merged_type) => {
            conn.execute(
                "UPDATE delta_queue
                 SET change_type = ?2, new_hash = ?3, lines_changed = ?4
                 WHERE id = ?1",
                params![
                    existing.id,
                    merged_type.to_string(),
                    new_hash,
                    existing.lines_changed.max(lines_changed),
                ],
            )?;
            Ok(Some(existing.id))
        }
    }
}

/// All pending entries for a project, oldest first
pub fn pending_entries_sync(conn: &Connection, project_id: &str) -> Result<Vec<DeltaEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM delta_queue
         WHERE project_id = ?1 AND status = 'pending'
         ORDER BY detected_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id], entry_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Atomically snapshot pending entries and mark them `indexing`.
/// When `only_ids` is given, restricts the snapshot to those entries
/// (used by just-in-time indexing).
pub fn claim_pending_sync(
    conn: &Connection,
    project_id: &str,
    only_ids: Option<&[String]>,
) -> Result<Vec<DeltaEntry>> {
    let tx = conn.unchecked_transaction()?;
    let mut entries = {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM delta_queue
             WHERE project_id = ?1 AND status = 'pending'
             ORDER BY detected_at"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows: Vec<DeltaEntry> = stmt
            .query_map(params![project_id], entry_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };
    if let Some(ids) = only_ids {
        entries.retain(|e| ids.contains(&e.id));
    }
    for entry in &entries {
        tx.execute(
            "UPDATE delta_queue SET status = 'indexing' WHERE id = ?1",
            params![entry.id],
        )?;
    }
    tx.commit()?;
    Ok(entries)
}

/// Transition an entry's status, optionally recording a failure message
pub fn mark_status_sync(
    conn: &Connection,
    entry_id: &str,
    status: EntryStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE delta_queue SET status = ?2, error = ?3 WHERE id = ?1",
        params![entry_id, status.to_string(), error],
    )?;
    Ok(())
}

/// Remove entries that completed indexing
pub fn purge_indexed_sync(conn: &Connection, project_id: &str) -> Result<usize> {
    let purged = conn.execute(
        "DELETE FROM delta_queue WHERE project_id = ?1 AND status = 'indexed'",
        params![project_id],
    )?;
    Ok(purged)
}

/// Queue status snapshot for operational tooling
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub queued_files: usize,
    pub total_lines: i64,
    pub oldest_age_secs: Option<i64>,
    pub pending: Vec<(String, ChangeType)>,
    pub failed: usize,
}

pub fn queue_status_sync(conn: &Connection, project_id: &str) -> Result<QueueStatus> {
    let entries = pending_entries_sync(conn, project_id)?;
    let now = Utc::now();
    let oldest_age_secs = entries
        .first()
        .map(|e| (now - e.detected_at).num_seconds().max(0));
    let total_lines = entries.iter().map(|e| e.lines_changed).sum();
    let failed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM delta_queue WHERE project_id = ?1 AND status = 'failed'",
        params![project_id],
        |row| row.get(0),
    )?;
    Ok(QueueStatus {
        queued_files: entries.len(),
        total_lines,
        oldest_age_secs,
        pending: entries
            .into_iter()
            .map(|e| (e.file_path, e.change_type))
            .collect(),
        failed: failed as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn enqueue(conn: &Connection, path: &str, change: ChangeType) -> Option<String> {
        enqueue_change_sync(conn, "p1", path, change, None, Some("h"), 10).unwrap()
    }

    #[test]
    fn test_duplicate_enqueue_coalesces() {
        let conn = test_conn();
        let first = enqueue(&conn, "a.py", ChangeType::Modified).unwrap();
        let second = enqueue(&conn, "a.py", ChangeType::Modified).unwrap();
        assert_eq!(first, second);
        assert_eq!(pending_entries_sync(&conn, "p1").unwrap().len(), 1);
    }

    #[test]
    fn test_coalesce_preserves_detected_at() {
        let conn = test_conn();
        enqueue(&conn, "a.py", ChangeType::Modified);
        let before = pending_entries_sync(&conn, "p1").unwrap()[0].detected_at;
        enqueue(&conn, "a.py", ChangeType::Modified);
        let after = pending_entries_sync(&conn, "p1").unwrap()[0].detected_at;
        assert_eq!(before, after);
    }

    #[test]
    fn test_delete_cancels_pending_add() {
        let conn = test_conn();
        enqueue(&conn, "new.py", ChangeType::Added);
        let survivor = enqueue(&conn, "new.py", ChangeType::Deleted);
        assert!(survivor.is_none());
        assert!(pending_entries_sync(&conn, "p1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_supersedes_pending_modify() {
        let conn = test_conn();
        enqueue(&conn, "a.py", ChangeType::Modified);
        enqueue(&conn, "a.py", ChangeType::Deleted);
        let entries = pending_entries_sync(&conn, "p1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change_type, ChangeType::Deleted);
    }

    #[test]
    fn test_recreate_supersedes_pending_delete() {
        let conn = test_conn();
        enqueue(&conn, "a.py", ChangeType::Deleted);
        enqueue(&conn, "a.py", ChangeType::Added);
        let entries = pending_entries_sync(&conn, "p1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn test_claim_marks_indexing() {
        let conn = test_conn();
        enqueue(&conn, "a.py", ChangeType::Modified);
        enqueue(&conn, "b.py", ChangeType::Added);
        let claimed = claim_pending_sync(&conn, "p1", None).unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(pending_entries_sync(&conn, "p1").unwrap().is_empty());
    }

    #[test]
    fn test_claim_subset_leaves_rest_pending() {
        let conn = test_conn();
        let keep = enqueue(&conn, "a.py", ChangeType::Modified).unwrap();
        enqueue(&conn, "b.py", ChangeType::Modified);
        let claimed = claim_pending_sync(&conn, "p1", Some(&[keep])).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].file_path, "a.py");
        let remaining = pending_entries_sync(&conn, "p1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_path, "b.py");
    }

    #[test]
    fn test_failed_entries_do_not_block() {
        let conn = test_conn();
        let id = enqueue(&conn, "a.py", ChangeType::Modified).unwrap();
        mark_status_sync(&conn, &id, EntryStatus::Failed, Some("parse error")).unwrap();
        enqueue(&conn, "b.py", ChangeType::Modified);

        let status = queue_status_sync(&conn, "p1").unwrap();
        assert_eq!(status.queued_files, 1);
        assert_eq!(status.failed, 1);
    }

    #[test]
    fn test_purge_removes_only_indexed() {
        let conn = test_conn();
        let a = enqueue(&conn, "a.py", ChangeType::Modified).unwrap();
        enqueue(&conn, "b.py", ChangeType::Modified);
        mark_status_sync(&conn, &a, EntryStatus::Indexed, None).unwrap();
        assert_eq!(purge_indexed_sync(&conn, "p1").unwrap(), 1);
        assert_eq!(pending_entries_sync(&conn, "p1").unwrap().len(), 1);
    }

    #[test]
    fn test_status_totals() {
        let conn = test_conn();
        enqueue_change_sync(&conn, "p1", "a.py", ChangeType::Modified, None, Some("h"), 300)
            .unwrap();
        enqueue_change_sync(&conn, "p1", "b.py", ChangeType::Modified, None, Some("h"), 700)
            .unwrap();
        let status = queue_status_sync(&conn, "p1").unwrap();
        assert_eq!(status.queued_files, 2);
        assert_eq!(status.total_lines, 1000);
        assert!(status.oldest_age_secs.is_some());
    }
}
