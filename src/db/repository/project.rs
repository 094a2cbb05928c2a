use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_uuid, fmt_ts, now_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::Project;

/// Look up the project for a root path, creating it on first open.
pub fn ensure_project(conn: &Connection, root_path: &str) -> Result<Project, DatabaseError> {
    if let Some(project) = get_project_by_root(conn, root_path)? {
        return Ok(project);
    }

    let name = std::path::Path::new(root_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string();

    let project = Project {
        id: Uuid::new_v4(),
        root_path: root_path.to_string(),
        name,
        created_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO projects (id, root_path, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            project.id.to_string(),
            project.root_path,
            project.name,
            fmt_ts(&project.created_at),
        ],
    )?;
    tracing::info!(project_id = %project.id, root = %root_path, "Project created");
    Ok(project)
}

pub fn get_project_by_root(
    conn: &Connection,
    root_path: &str,
) -> Result<Option<Project>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, root_path, name, created_at FROM projects WHERE root_path = ?1",
            params![root_path],
            |row| {
                let id: String = row.get(0)?;
                let created_at: String = row.get(3)?;
                Ok(Project {
                    id: col_uuid(0, &id)?,
                    root_path: row.get(1)?,
                    name: row.get(2)?,
                    created_at: parse_ts(&created_at),
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn ensure_project_is_idempotent() {
        let conn = open_memory_database().unwrap();

        let first = ensure_project(&conn, "/tmp/novel").unwrap();
        let second = ensure_project(&conn, "/tmp/novel").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "novel");
    }

    #[test]
    fn different_roots_get_different_projects() {
        let conn = open_memory_database().unwrap();

        let a = ensure_project(&conn, "/tmp/novel-a").unwrap();
        let b = ensure_project(&conn, "/tmp/novel-b").unwrap();
        assert_ne!(a.id, b.id);
    }
}
