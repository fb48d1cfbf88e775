// crates/oracle-server/src/db/projects.rs
// Project registry queries

use crate::error::{OracleError, Result};
use rusqlite::{Connection, OptionalExtension, params};

/// One registered project
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: String,
    pub root_path: String,
    pub created_at: String,
}

/// Register a project, or update its root path if already present
pub fn create_project_sync(conn: &Connection, id: &str, root_path: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, root_path) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET root_path = excluded.root_path",
        params![id, root_path],
    )?;
    Ok(())
}

/// Look up a project by id
pub fn get_project_sync(conn: &Connection, id: &str) -> Result<Option<ProjectRow>> {
    let row = conn
        .query_row(
            "SELECT id, root_path, created_at FROM projects WHERE id = ?1",
            params![id],
            |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    root_path: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Look up a project, failing with NotFound when absent
pub fn require_project_sync(conn: &Connection, id: &str) -> Result<ProjectRow> {
    get_project_sync(conn, id)?.ok_or_else(|| OracleError::NotFound(format!("project {id}")))
}

/// All registered projects
pub fn list_projects_sync(conn: &Connection) -> Result<Vec<ProjectRow>> {
    let mut stmt =
        conn.prepare("SELECT id, root_path, created_at FROM projects ORDER BY created_at")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ProjectRow {
                id: row.get(0)?,
                root_path: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
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

    #[test]
    fn test_create_and_get() {
        let conn = test_conn();
        create_project_sync(&conn, "p1", "/tmp/p1").unwrap();
        let project = get_project_sync(&conn, "p1").unwrap().unwrap();
        assert_eq!(project.root_path, "/tmp/p1");
        assert!(get_project_sync(&conn, "p2").unwrap().is_none());
    }

    #[test]
    fn test_create_updates_root_path() {
        let conn = test_conn();
        create_project_sync(&conn, "p1", "/tmp/old").unwrap();
        create_project_sync(&conn, "p1", "/tmp/new").unwrap();
        let project = get_project_sync(&conn, "p1").unwrap().unwrap();
        assert_eq!(project.root_path, "/tmp/new");
        assert_eq!(list_projects_sync(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_require_project_not_found() {
        let conn = test_conn();
        let err = require_project_sync(&conn, "missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
