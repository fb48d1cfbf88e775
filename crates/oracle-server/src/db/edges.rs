// crates/oracle-server/src/db/edges.rs
// Symbol graph storage: typed edges and breadth-first neighbor lookup

use crate::error::Result;
use rusqlite::{Connection, params};
use std::collections::{HashMap, HashSet, VecDeque};
use strum::{Display, EnumString};

/// Relationship carried by a symbol edge.
/// Priority for neighbor tie-breaks: inherits > calls > references > imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EdgeType {
    Inherits,
    Calls,
    References,
    Imports,
}

impl EdgeType {
    /// Lower is closer when breaking ties at equal hop distance
    pub fn priority(&self) -> u8 {
        match self {
            Self::Inherits => 0,
            Self::Calls => 1,
            Self::References => 2,
            Self::Imports => 3,
        }
    }
}

/// An edge ready for insertion. `target_chunk_id` stays null until the
/// target symbol exists in the project's symbol table.
#[derive(Debug, Clone)]
pub struct EdgeInsert {
    pub source_chunk_id: String,
    pub target_qualified_name: String,
    pub edge_type: EdgeType,
}

/// Insert edges, ignoring duplicates. Resolution happens separately so a
/// bulk upsert can re-resolve once after all files are written.
pub fn insert_edges_sync(conn: &Connection, project_id: &str, edges: &[EdgeInsert]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO symbol_edges
             (project_id, source_chunk_id, target_qualified_name, edge_type)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for edge in edges {
        stmt.execute(params![
            project_id,
            edge.source_chunk_id,
            edge.target_qualified_name,
            edge.edge_type.to_string(),
        ])?;
    }
    Ok(())
}

/// Re-resolve dangling edges against the current chunk table.
///
/// First pass matches on qualified name; a second pass matches the bare
/// symbol name for references recorded without module context. Edges that
/// still resolve to nothing stay pending and may resolve after a later
/// commit adds their target.
pub fn resolve_edges_sync(conn: &Connection, project_id: &str) -> Result<usize> {
    let by_qualified = conn.execute(
        "UPDATE symbol_edges SET target_chunk_id = (
             SELECT c.id FROM code_chunks c
             WHERE c.project_id = symbol_edges.project_id
               AND c.qualified_name = symbol_edges.target_qualified_name
             LIMIT 1)
         WHERE project_id = ?1 AND target_chunk_id IS NULL",
        params![project_id],
    )?;
    let by_name = conn.execute(
        "UPDATE symbol_edges SET target_chunk_id = (
             SELECT c.id FROM code_chunks c
             WHERE c.project_id = symbol_edges.project_id
               AND c.symbol_name = symbol_edges.target_qualified_name
             LIMIT 1)
         WHERE project_id = ?1 AND target_chunk_id IS NULL",
        params![project_id],
    )?;
    // Clear resolutions that point at since-deleted chunks
    conn.execute(
        "UPDATE symbol_edges SET target_chunk_id = NULL
         WHERE project_id = ?1 AND target_chunk_id IS NOT NULL
           AND target_chunk_id NOT IN (SELECT id FROM code_chunks WHERE project_id = ?1)",
        params![project_id],
    )?;
    Ok(by_qualified + by_name)
}

/// A neighbor found by the graph walk
#[derive(Debug, Clone)]
pub struct GraphNeighbor {
    pub chunk_id: String,
    pub distance: u32,
    pub via: EdgeType,
}

/// Breadth-first walk over resolved edges, both directions, up to `hops`.
///
/// A visited set bounds cyclic graphs; results order by hop count then
/// edge-type priority. Seeds themselves are not returned.
pub fn graph_neighbors_sync(
    conn: &Connection,
    project_id: &str,
    seed_chunk_ids: &[String],
    hops: usize,
    limit: usize,
) -> Result<Vec<GraphNeighbor>> {
    if seed_chunk_ids.is_empty() || hops == 0 || limit == 0 {
        return Ok(Vec::new());
    }

    let seeds: HashSet<&String> = seed_chunk_ids.iter().collect();
    let mut visited: HashSet<String> = seed_chunk_ids.iter().cloned().collect();
    let mut found: HashMap<String, (u32, u8)> = HashMap::new();
    let mut frontier: VecDeque<(String, u32)> =
        seed_chunk_ids.iter().map(|id| (id.clone(), 0)).collect();

    let mut forward = conn.prepare(
        "SELECT target_chunk_id, edge_type FROM symbol_edges
         WHERE project_id = ?1 AND source_chunk_id = ?2 AND target_chunk_id IS NOT NULL",
    )?;
    let mut reverse = conn.prepare(
        "SELECT source_chunk_id, edge_type FROM symbol_edges
         WHERE project_id = ?1 AND target_chunk_id = ?2",
    )?;

    while let Some((current, depth)) = frontier.pop_front() {
        if depth as usize >= hops {
            continue;
        }
        let mut adjacent: Vec<(String, EdgeType)> = Vec::new();
        for stmt in [&mut forward, &mut reverse] {
            let rows = stmt.query_map(params![project_id, current], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows.filter_map(|r| r.ok()) {
                if let Ok(edge_type) = row.1.parse::<EdgeType>() {
                    adjacent.push((row.0, edge_type));
                }
            }
        }

        for (neighbor, edge_type) in adjacent {
            if seeds.contains(&neighbor) {
                continue;
            }
            let entry = found
                .entry(neighbor.clone())
                .or_insert((depth + 1, edge_type.priority()));
            // Keep the best (closest, highest-priority) route
            if (depth + 1, edge_type.priority()) < *entry {
                *entry = (depth + 1, edge_type.priority());
            }
            if visited.insert(neighbor.clone()) {
                frontier.push_back((neighbor, depth + 1));
            }
        }
    }

    let mut neighbors: Vec<GraphNeighbor> = found
        .into_iter()
        .map(|(chunk_id, (distance, priority))| GraphNeighbor {
            chunk_id,
            distance,
            via: priority_to_edge(priority),
        })
        .collect();
    neighbors.sort_by(|a, b| {
        (a.distance, a.via.priority(), a.chunk_id.as_str())
            .cmp(&(b.distance, b.via.priority(), b.chunk_id.as_str()))
    });
    neighbors.truncate(limit);
    Ok(neighbors)
}

fn priority_to_edge(priority: u8) -> EdgeType {
    match priority {
        0 => EdgeType::Inherits,
        1 => EdgeType::Calls,
        2 => EdgeType::References,
        _ => EdgeType::Imports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::chunks::{ChunkInsert, upsert_chunks_sync};
    use crate::db::schema::run_migrations;

    fn test_conn() -> Connection {
        crate::db::pool::ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn seed_chunk(conn: &Connection, file: &str, id: &str, name: &str) {
        upsert_chunks_sync(
            conn,
            "p1",
            file,
            &[ChunkInsert {
                id: id.to_string(),
                language: "rust".to_string(),
                symbol_name: name.to_string(),
                qualified_name: name.to_string(),
                kind: "function".to_string(),
                signature: None,
                docstring: None,
                body: format!("fn {name}() {{}}"),
                start_line: 1,
                end_line: 1,
                embedding: None,
            }],
            "h",
        )
        .unwrap();
    }

    fn edge(src: &str, target: &str, edge_type: EdgeType) -> EdgeInsert {
        EdgeInsert {
            source_chunk_id: src.to_string(),
            target_qualified_name: target.to_string(),
            edge_type,
        }
    }

    #[test]
    fn test_edge_type_roundtrip() {
        for edge_type in [
            EdgeType::Calls,
            EdgeType::Imports,
            EdgeType::Inherits,
            EdgeType::References,
        ] {
            assert_eq!(edge_type.to_string().parse::<EdgeType>().unwrap(), edge_type);
        }
    }

    #[test]
    fn test_resolution_fills_targets() {
        let conn = test_conn();
        seed_chunk(&conn, "a.rs", "c1", "caller");
        seed_chunk(&conn, "b.rs", "c2", "callee");
        insert_edges_sync(&conn, "p1", &[edge("c1", "callee", EdgeType::Calls)]).unwrap();
        resolve_edges_sync(&conn, "p1").unwrap();

        let target: Option<String> = conn
            .query_row(
                "SELECT target_chunk_id FROM symbol_edges WHERE source_chunk_id = 'c1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(target.as_deref(), Some("c2"));
    }

    #[test]
    fn test_late_resolution_after_target_appears() {
        let conn = test_conn();
        seed_chunk(&conn, "a.rs", "c1", "caller");
        insert_edges_sync(&conn, "p1", &[edge("c1", "late_fn", EdgeType::Calls)]).unwrap();
        resolve_edges_sync(&conn, "p1").unwrap();

        let neighbors = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 2, 10).unwrap();
        assert!(neighbors.is_empty());

        seed_chunk(&conn, "late.rs", "c9", "late_fn");
        resolve_edges_sync(&conn, "p1").unwrap();
        let neighbors = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 2, 10).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].chunk_id, "c9");
    }

    #[test]
    fn test_bfs_hop_bound_and_cycles() {
        let conn = test_conn();
        for (id, name) in [("c1", "a"), ("c2", "b"), ("c3", "c"), ("c4", "d")] {
            seed_chunk(&conn, &format!("{name}.rs"), id, name);
        }
        // a -> b -> c -> d, plus a cycle c -> a
        insert_edges_sync(
            &conn,
            "p1",
            &[
                edge("c1", "b", EdgeType::Calls),
                edge("c2", "c", EdgeType::Calls),
                edge("c3", "d", EdgeType::Calls),
                edge("c3", "a", EdgeType::Calls),
            ],
        )
        .unwrap();
        resolve_edges_sync(&conn, "p1").unwrap();

        let one_hop = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 1, 10).unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].chunk_id, "c2");

        // Cycle must not loop; d is 3 hops out
        let two_hops = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 2, 10).unwrap();
        let ids: Vec<&str> = two_hops.iter().map(|n| n.chunk_id.as_str()).collect();
        assert!(ids.contains(&"c2"));
        assert!(ids.contains(&"c3"));
        assert!(!ids.contains(&"c4"));
        // The seed never appears in its own neighborhood
        assert!(!ids.contains(&"c1"));
    }

    #[test]
    fn test_tie_break_by_edge_priority() {
        let conn = test_conn();
        for (id, name) in [("c1", "seed"), ("c2", "by_import"), ("c3", "by_inherit")] {
            seed_chunk(&conn, &format!("{name}.rs"), id, name);
        }
        insert_edges_sync(
            &conn,
            "p1",
            &[
                edge("c1", "by_import", EdgeType::Imports),
                edge("c1", "by_inherit", EdgeType::Inherits),
            ],
        )
        .unwrap();
        resolve_edges_sync(&conn, "p1").unwrap();

        let neighbors = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 1, 10).unwrap();
        assert_eq!(neighbors[0].chunk_id, "c3");
        assert_eq!(neighbors[1].chunk_id, "c2");
    }

    #[test]
    fn test_reverse_edges_reachable() {
        let conn = test_conn();
        seed_chunk(&conn, "a.rs", "c1", "target_fn");
        seed_chunk(&conn, "b.rs", "c2", "caller_fn");
        insert_edges_sync(&conn, "p1", &[edge("c2", "target_fn", EdgeType::Calls)]).unwrap();
        resolve_edges_sync(&conn, "p1").unwrap();

        // Walking from the callee finds the caller via the reverse index
        let neighbors = graph_neighbors_sync(&conn, "p1", &["c1".to_string()], 1, 10).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].chunk_id, "c2");
    }
}
