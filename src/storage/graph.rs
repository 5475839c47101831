//! Graph store (C2): persistent nodes and edges with upsert, neighbor
//! expansion, counts, and access timestamps. Grounded in the teacher's
//! `entities`/`memory_entities` migration shape, but the traversal itself
//! (`get_neighbors`) is new: it uses a recursive CTE so a bounded-depth
//! BFS is one round-trip rather than one query per hop.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::codec::{decode_embedding, encode_embedding};
use crate::error::{EngramError, Result};
use crate::ids::node_id;
use crate::types::{Edge, Node};

use super::connection::Storage;

fn node_from_row(row: &Row) -> rusqlite::Result<Node> {
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    let metadata_str: String = row.get("metadata")?;
    let type_str: String = row.get("type")?;

    Ok(Node {
        id: row.get("id")?,
        name: row.get("name")?,
        node_type: type_str.parse().unwrap_or(crate::types::EntityType::Concept),
        description: row.get("description")?,
        embedding: embedding_blob.and_then(|b| decode_embedding(&b)),
        created_at: row.get("created_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
        access_count: row.get("access_count")?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
    })
}

fn edge_from_row(row: &Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        relation: row.get("relation")?,
        target_id: row.get("target_id")?,
        weight: row.get("weight")?,
        created_at: row.get("created_at")?,
    })
}

impl Storage {
    /// Upsert by id; generates the deterministic id if empty.
    pub fn add_node(&self, mut node: Node) -> Result<Node> {
        if node.id.is_empty() {
            node.id = node_id(&node.name, node.node_type);
        }
        let metadata = serde_json::to_string(&node.metadata)?;
        let embedding = node.embedding.as_deref().map(encode_embedding);

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO nodes (id, name, type, description, embedding, created_at, last_accessed_at, access_count, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    description = excluded.description,
                    embedding = COALESCE(excluded.embedding, nodes.embedding),
                    metadata = excluded.metadata",
                params![
                    node.id,
                    node.name,
                    node.node_type.as_str(),
                    node.description,
                    embedding,
                    node.created_at.to_rfc3339(),
                    node.last_accessed_at.map(|t| t.to_rfc3339()),
                    node.access_count,
                    metadata,
                ],
            )?;
            Ok(())
        })?;

        Ok(node)
    }

    /// Existence check with no access-time side effect, used by the ingest
    /// pipeline to decide whether an upsert is a first occurrence.
    pub fn node_exists(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes WHERE id = ?1", [id], |r| r.get(0))?;
            Ok(count > 0)
        })
    }

    /// Returns the node if present, atomically bumping `last_accessed_at` as
    /// a best-effort side effect — a failure to record the access must not
    /// fail the read.
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let node = self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, name, type, description, embedding, created_at, last_accessed_at, access_count, metadata
                 FROM nodes WHERE id = ?1",
                [id],
                node_from_row,
            )
            .optional()
            .map_err(EngramError::from)
        })?;

        if node.is_some() {
            let _ = self.with_connection(|conn| {
                conn.execute(
                    "UPDATE nodes SET last_accessed_at = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )
            });
        }

        Ok(node.map(|mut n| {
            n.last_accessed_at = Some(Utc::now());
            n
        }))
    }

    /// Case-insensitive exact match, ordered `(created_at asc, id asc)`.
    pub fn find_nodes_by_name(&self, name: &str) -> Result<Vec<Node>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, type, description, embedding, created_at, last_accessed_at, access_count, metadata
                 FROM nodes WHERE name = ?1 COLLATE NOCASE ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([name], node_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Exactly one match; `NotFound` or `Ambiguous` otherwise.
    pub fn find_node_by_name(&self, name: &str) -> Result<Node> {
        let mut matches = self.find_nodes_by_name(name)?;
        match matches.len() {
            0 => Err(EngramError::NotFound(format!("node named '{name}'"))),
            1 => Ok(matches.remove(0)),
            _ => Err(EngramError::Ambiguous(format!(
                "{} nodes named '{name}'",
                matches.len()
            ))),
        }
    }

    /// Upsert by id; endpoints must already exist (enforced by the foreign
    /// key) or the insert fails with `Dependency`.
    pub fn add_edge(&self, mut edge: Edge) -> Result<Edge> {
        if edge.id.is_empty() {
            edge.id = crate::ids::edge_id(&edge.source_id, &edge.relation, &edge.target_id);
        }
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO edges (id, source_id, relation, target_id, weight, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET weight = excluded.weight",
                params![
                    edge.id,
                    edge.source_id,
                    edge.relation,
                    edge.target_id,
                    edge.weight,
                    edge.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                    EngramError::Dependency(format!("edge endpoints do not exist: {e}"))
                }
                other => EngramError::from(other),
            })?;
            Ok(())
        })?;
        Ok(edge)
    }

    /// All edges incident on `node_id` (either endpoint), ordered by
    /// `created_at`.
    pub fn get_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, relation, target_id, weight, created_at
                 FROM edges WHERE source_id = ?1 OR target_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([node_id], edge_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Distinct nodes reachable within `depth` undirected hops, excluding
    /// the start node. Implemented as a single recursive-CTE query so
    /// bounding depth does not require one round-trip per hop.
    pub fn get_neighbors(&self, start_id: &str, depth: usize) -> Result<Vec<(Node, usize)>> {
        if depth < 1 {
            return Err(EngramError::Validation("depth must be >= 1".into()));
        }

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                WITH RECURSIVE reachable(node_id, hop) AS (
                    SELECT ?1, 0
                    UNION
                    SELECT
                        CASE WHEN e.source_id = r.node_id THEN e.target_id ELSE e.source_id END,
                        r.hop + 1
                    FROM edges e
                    JOIN reachable r ON e.source_id = r.node_id OR e.target_id = r.node_id
                    WHERE r.hop < ?2
                )
                SELECT n.id, n.name, n.type, n.description, n.embedding, n.created_at,
                       n.last_accessed_at, n.access_count, n.metadata, MIN(r.hop) AS hop
                FROM reachable r
                JOIN nodes n ON n.id = r.node_id
                WHERE r.node_id != ?1 AND r.hop > 0
                GROUP BY n.id
                ORDER BY hop ASC
                "#,
            )?;
            let rows = stmt.query_map(params![start_id, depth as i64], |row| {
                let node = node_from_row(row)?;
                let hop: i64 = row.get("hop")?;
                Ok((node, hop as usize))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn node_count(&self) -> Result<i64> {
        self.with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?))
    }

    pub fn edge_count(&self) -> Result<i64> {
        self.with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?))
    }

    /// Batch-set `last_accessed_at = now` for the supplied ids. Dedup first
    /// so repeated ids in the input don't translate into repeated writes.
    pub fn update_access_time(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let unique: Vec<&String> = {
            let mut seen = std::collections::HashSet::new();
            ids.iter().filter(|id| seen.insert(id.as_str())).collect()
        };
        let now = Utc::now().to_rfc3339();

        self.with_transaction(|conn| {
            let placeholders = unique.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("UPDATE nodes SET last_accessed_at = ? WHERE id IN ({placeholders})");
            let mut stmt_params: Vec<&dyn rusqlite::ToSql> = vec![&now];
            for id in &unique {
                stmt_params.push(*id as &dyn rusqlite::ToSql);
            }
            conn.execute(&sql, stmt_params.as_slice())?;
            Ok(())
        })
    }

    pub fn get_all_nodes(&self) -> Result<Vec<Node>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, type, description, embedding, created_at, last_accessed_at, access_count, metadata
                 FROM nodes",
            )?;
            let rows = stmt.query_map([], node_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn delete_node(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn delete_edge(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM edges WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Batched `node_id -> memory_ids` lookup used by C9's access
    /// reinforcement and decay scoring; one query regardless of input size.
    pub fn nodes_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Node>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_connection(|conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT id, name, type, description, embedding, created_at, last_accessed_at, access_count, metadata
                 FROM nodes WHERE id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), node_from_row)?;
            let mut map = HashMap::new();
            for row in rows {
                let node = row?;
                map.insert(node.id.clone(), node);
            }
            Ok(map)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    fn storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn add_node_generates_deterministic_id() {
        let storage = storage();
        let node = Node::new("React", EntityType::Technology, "a UI library");
        let saved = storage.add_node(node).unwrap();
        assert_eq!(saved.id, node_id("React", EntityType::Technology));
    }

    #[test]
    fn get_node_returns_none_for_missing() {
        let storage = storage();
        assert!(storage.get_node("missing").unwrap().is_none());
    }

    #[test]
    fn find_node_by_name_detects_ambiguity() {
        let storage = storage();
        storage
            .add_node(Node::new("Python", EntityType::Technology, "lang"))
            .unwrap();
        storage
            .add_node(Node::new("Python", EntityType::Concept, "snake"))
            .unwrap();
        let err = storage.find_node_by_name("python").unwrap_err();
        assert!(matches!(err, EngramError::Ambiguous(_)));
    }

    #[test]
    fn add_edge_rejects_missing_endpoints() {
        let storage = storage();
        let edge = Edge::new("missing-a", "RELATES", "missing-b");
        let err = storage.add_edge(edge).unwrap_err();
        assert!(matches!(err, EngramError::Dependency(_)));
    }

    #[test]
    fn get_neighbors_respects_depth_and_dedups() {
        let storage = storage();
        let a = storage.add_node(Node::new("A", EntityType::Concept, "")).unwrap();
        let b = storage.add_node(Node::new("B", EntityType::Concept, "")).unwrap();
        let c = storage.add_node(Node::new("C", EntityType::Concept, "")).unwrap();
        storage.add_edge(Edge::new(a.id.as_str(), "links", b.id.as_str())).unwrap();
        storage.add_edge(Edge::new(b.id.as_str(), "links", c.id.as_str())).unwrap();

        let depth1 = storage.get_neighbors(&a.id, 1).unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].0.id, b.id);

        let depth2 = storage.get_neighbors(&a.id, 2).unwrap();
        let ids: Vec<_> = depth2.iter().map(|(n, _)| n.id.clone()).collect();
        assert!(ids.contains(&b.id));
        assert!(ids.contains(&c.id));
        assert_eq!(depth2.len(), 2);
    }

    #[test]
    fn update_access_time_dedups_without_error() {
        let storage = storage();
        let a = storage.add_node(Node::new("A", EntityType::Concept, "")).unwrap();
        storage
            .update_access_time(&[a.id.clone(), a.id.clone()])
            .unwrap();
        let reloaded = storage.get_node(&a.id).unwrap().unwrap();
        assert!(reloaded.last_accessed_at.is_some());
    }

    #[test]
    fn node_exists_has_no_access_side_effect() {
        let storage = storage();
        let a = storage.add_node(Node::new("A", EntityType::Concept, "")).unwrap();
        assert!(storage.node_exists(&a.id).unwrap());
        assert!(!storage.node_exists("missing").unwrap());

        let raw: Option<String> = storage
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT last_accessed_at FROM nodes WHERE id = ?1",
                    [&a.id],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert!(raw.is_none());
    }
}
