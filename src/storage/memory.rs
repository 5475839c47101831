//! Memory store (C5): the first-class, versioned knowledge unit and its
//! provenance links into the graph store. Every write that touches more
//! than one row runs inside `with_transaction` so a partial failure never
//! leaves `version`/`updated_at` out of sync with the rest of the record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::error::{EngramError, Result};
use crate::types::{
    ListMemoriesOptions, Memory, MemoryStatus, MemorySummary, RetentionPolicy, SortField, SortOrder,
    UpdateMemoryPatch,
};

use super::connection::Storage;

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_dt_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_dt(&s))
}

fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let decisions: String = row.get("decisions")?;
    let rationale: String = row.get("rationale")?;
    let metadata: String = row.get("metadata")?;
    let status: String = row.get("status")?;
    let retention_policy: String = row.get("retention_policy")?;

    Ok(Memory {
        id: row.get("id")?,
        topic: row.get("topic")?,
        context: row.get("context")?,
        decisions: serde_json::from_str(&decisions).unwrap_or_default(),
        rationale: serde_json::from_str(&rationale).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        doc_hash: row.get("doc_hash")?,
        source: row.get("source")?,
        version: row.get("version")?,
        status: status.parse().unwrap_or(MemoryStatus::Pending),
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
        access_count: row.get("access_count")?,
        last_accessed_at: parse_dt_opt(row.get("last_accessed_at")?),
        access_velocity: row.get("access_velocity")?,
        superseded_by: row.get("superseded_by")?,
        retention_policy: retention_policy.parse().unwrap_or(RetentionPolicy::Standard),
        retention_until: parse_dt_opt(row.get("retention_until")?),
        pinned: row.get::<_, i64>("pinned")? != 0,
        pinned_at: parse_dt_opt(row.get("pinned_at")?),
        pinned_reason: row.get("pinned_reason")?,
    })
}

impl Storage {
    pub fn add_memory(&self, memory: Memory) -> Result<Memory> {
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO memories (
                    id, topic, context, decisions, rationale, metadata, doc_hash, source,
                    version, status, created_at, updated_at, access_count, last_accessed_at,
                    access_velocity, superseded_by, retention_policy, retention_until,
                    pinned, pinned_at, pinned_reason
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
                params![
                    memory.id,
                    memory.topic,
                    memory.context,
                    serde_json::to_string(&memory.decisions)?,
                    serde_json::to_string(&memory.rationale)?,
                    serde_json::to_string(&memory.metadata)?,
                    memory.doc_hash,
                    memory.source,
                    memory.version,
                    memory.status.as_str(),
                    memory.created_at.to_rfc3339(),
                    memory.updated_at.to_rfc3339(),
                    memory.access_count,
                    memory.last_accessed_at.map(|t| t.to_rfc3339()),
                    memory.access_velocity,
                    memory.superseded_by,
                    memory.retention_policy.as_str(),
                    memory.retention_until.map(|t| t.to_rfc3339()),
                    memory.pinned as i64,
                    memory.pinned_at.map(|t| t.to_rfc3339()),
                    memory.pinned_reason,
                ],
            )?;
            Ok(())
        })?;
        Ok(memory)
    }

    /// Returns the hydrated memory and records an access as a side effect.
    pub fn get_memory(&self, id: &str) -> Result<Memory> {
        let memory = self.with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM memories WHERE id = ?1",
                [id],
                memory_from_row,
            )
            .optional()
            .map_err(EngramError::from)
        })?;
        let memory = memory.ok_or_else(|| EngramError::NotFound(format!("memory {id}")))?;
        let _ = self.update_memory_access(id);
        Ok(memory)
    }

    /// Reads without recording an access; used internally where the access
    /// side effect is handled separately (e.g. batched updates in search).
    pub fn peek_memory(&self, id: &str) -> Result<Memory> {
        self.with_connection(|conn| {
            conn.query_row("SELECT * FROM memories WHERE id = ?1", [id], memory_from_row)
                .optional()
                .map_err(EngramError::from)
        })?
        .ok_or_else(|| EngramError::NotFound(format!("memory {id}")))
    }

    pub fn list_memories(&self, options: &ListMemoriesOptions) -> Result<Vec<MemorySummary>> {
        let limit = options.limit.clamp(1, 100);
        let offset = options.offset.max(0);

        let sort_col = match options.sort_field {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::AccessCount => "access_count",
            SortField::LastAccessedAt => "last_accessed_at",
        };
        let sort_dir = match options.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let mut clauses = Vec::new();
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = options.status {
            clauses.push("status = ?".to_string());
            bind.push(Box::new(status.as_str().to_string()));
        }
        if let Some(policy) = options.retention_policy {
            clauses.push("retention_policy = ?".to_string());
            bind.push(Box::new(policy.as_str().to_string()));
        }
        if let Some(pinned) = options.pinned {
            clauses.push("pinned = ?".to_string());
            bind.push(Box::new(pinned as i64));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM memories {where_clause} ORDER BY {sort_col} {sort_dir}, created_at DESC LIMIT {limit} OFFSET {offset}"
        );

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params_ref.as_slice(), memory_from_row)?;
            let memories = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(memories
                .into_iter()
                .map(|m| MemorySummary {
                    id: m.id,
                    topic: m.topic,
                    preview: crate::types::truncate_preview(&m.context),
                    decision_count: m.decisions.len(),
                    status: m.status,
                    retention_policy: m.retention_policy,
                    pinned: m.pinned,
                    access_count: m.access_count,
                    superseded_by: m.superseded_by,
                })
                .collect())
        })
    }

    pub fn update_memory(&self, id: &str, patch: &UpdateMemoryPatch) -> Result<Memory> {
        self.with_transaction(|conn| {
            let mut current = conn
                .query_row("SELECT * FROM memories WHERE id = ?1", [id], memory_from_row)
                .optional()?
                .ok_or_else(|| EngramError::NotFound(format!("memory {id}")))?;

            if let Some(topic) = &patch.topic {
                current.topic = topic.clone();
            }
            if let Some(context) = &patch.context {
                current.context = context.clone();
            }
            if let Some(decisions) = &patch.decisions {
                current.decisions = decisions.clone();
            }
            if let Some(rationale) = &patch.rationale {
                current.rationale = rationale.clone();
            }
            if let Some(metadata) = &patch.metadata {
                current.metadata = metadata.clone();
            }
            if let Some(policy) = patch.retention_policy {
                current.retention_policy = policy;
            }
            if let Some(retention_until) = patch.retention_until {
                current.retention_until = retention_until;
            }
            // Recomputed unconditionally: cheap, and correct whether or not
            // the content fields were actually touched by this patch.
            current.doc_hash = crate::types::compute_doc_hash(
                &current.topic,
                &current.context,
                &current.decisions,
                &current.rationale,
            );
            current.updated_at = Utc::now();
            current.version += 1;

            conn.execute(
                "UPDATE memories SET topic=?1, context=?2, decisions=?3, rationale=?4, metadata=?5,
                    doc_hash=?6, retention_policy=?7, retention_until=?8, updated_at=?9, version=?10 WHERE id=?11",
                params![
                    current.topic,
                    current.context,
                    serde_json::to_string(&current.decisions)?,
                    serde_json::to_string(&current.rationale)?,
                    serde_json::to_string(&current.metadata)?,
                    current.doc_hash,
                    current.retention_policy.as_str(),
                    current.retention_until.map(|t| t.to_rfc3339()),
                    current.updated_at.to_rfc3339(),
                    current.version,
                    id,
                ],
            )?;
            Ok(current)
        })
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
            if affected == 0 {
                return Err(EngramError::NotFound(format!("memory {id}")));
            }
            Ok(())
        })
    }

    pub fn link_provenance(&self, memory_id: &str, node_ids: &[String], edge_ids: &[String]) -> Result<()> {
        self.with_transaction(|conn| {
            let now = Utc::now().to_rfc3339();
            for node_id in node_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO memory_nodes (memory_id, node_id, created_at) VALUES (?1, ?2, ?3)",
                    params![memory_id, node_id, now],
                )?;
            }
            for edge_id in edge_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO memory_edges (memory_id, edge_id, created_at) VALUES (?1, ?2, ?3)",
                    params![memory_id, edge_id, now],
                )?;
            }
            Ok(())
        })
    }

    pub fn unlink_provenance(&self, memory_id: &str) -> Result<()> {
        self.with_transaction(|conn| {
            conn.execute("DELETE FROM memory_nodes WHERE memory_id = ?1", [memory_id])?;
            conn.execute("DELETE FROM memory_edges WHERE memory_id = ?1", [memory_id])?;
            Ok(())
        })
    }

    pub fn get_provenance_by_memory(&self, memory_id: &str) -> Result<(Vec<String>, Vec<String>)> {
        self.with_connection(|conn| {
            let mut node_stmt = conn.prepare(
                "SELECT node_id FROM memory_nodes WHERE memory_id = ?1 ORDER BY created_at ASC",
            )?;
            let node_ids = node_stmt
                .query_map([memory_id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut edge_stmt = conn.prepare(
                "SELECT edge_id FROM memory_edges WHERE memory_id = ?1 ORDER BY created_at ASC",
            )?;
            let edge_ids = edge_stmt
                .query_map([memory_id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((node_ids, edge_ids))
        })
    }

    pub fn get_memories_by_node_id(&self, node_id: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT mn.memory_id FROM memory_nodes mn
                 JOIN memories m ON m.id = mn.memory_id
                 WHERE mn.node_id = ?1 ORDER BY m.updated_at DESC",
            )?;
            let ids = stmt
                .query_map([node_id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// One query for an arbitrary set of node ids; nodes with no memories
    /// get an empty vec in the returned map.
    pub fn get_memories_by_node_id_batched(&self, node_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut result: HashMap<String, Vec<String>> = node_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        if node_ids.is_empty() {
            return Ok(result);
        }

        self.with_connection(|conn| {
            let placeholders = node_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT mn.node_id, mn.memory_id FROM memory_nodes mn
                 JOIN memories m ON m.id = mn.memory_id
                 WHERE mn.node_id IN ({placeholders}) ORDER BY mn.node_id, m.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(node_ids.iter()), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (node_id, memory_id) = row?;
                result.entry(node_id).or_default().push(memory_id);
            }
            Ok(())
        })?;

        Ok(result)
    }

    /// Full scan used by `prune`'s memory-level phase; unlike `list_memories`
    /// this is not paginated since prune must evaluate every memory.
    pub fn all_memories(&self) -> Result<Vec<Memory>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM memories")?;
            let rows = stmt.query_map([], memory_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Status transition with no other side effects; used by the ingest
    /// pipeline to flip a freshly-created memory from `pending` to
    /// `Active` once its provenance has been linked.
    pub fn set_memory_status(&self, id: &str, status: MemoryStatus) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE memories SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )?;
            if affected == 0 {
                return Err(EngramError::NotFound(format!("memory {id}")));
            }
            Ok(())
        })
    }

    /// Memory-level dedup key for `add_memory`: an existing `Active` memory
    /// with the same canonical hash is returned instead of creating a
    /// duplicate.
    pub fn find_memory_by_doc_hash_active(&self, doc_hash: &str) -> Result<Option<Memory>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM memories WHERE doc_hash = ?1 AND status = 'Active' LIMIT 1",
                [doc_hash],
                memory_from_row,
            )
            .optional()
            .map_err(EngramError::from)
        })
    }

    pub fn count_memories(&self) -> Result<i64> {
        self.with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?))
    }

    pub fn count_memory_references(&self, node_id: &str) -> Result<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM memory_nodes WHERE node_id = ?1",
                [node_id],
                |r| r.get(0),
            )?)
        })
    }

    /// `access_velocity = (access_count + 1) / max(1, days_since_created)`.
    pub fn update_memory_access(&self, id: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT created_at, access_count FROM memories WHERE id = ?1",
                    [id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let (created_at, access_count) = row.ok_or_else(|| EngramError::NotFound(format!("memory {id}")))?;

            let created_at = parse_dt(&created_at);
            let now = Utc::now();
            let days_since_created = (now - created_at).num_seconds() as f64 / 86400.0;
            let new_count = access_count + 1;
            let velocity = new_count as f64 / days_since_created.max(1.0);

            conn.execute(
                "UPDATE memories SET access_count = ?1, last_accessed_at = ?2, access_velocity = ?3 WHERE id = ?4",
                params![new_count, now.to_rfc3339(), velocity, id],
            )?;
            Ok(())
        })
    }

    /// Dedupes, then applies `update_memory_access` per id in one
    /// transaction; ids that no longer exist are skipped, not errors.
    pub fn batch_update_memory_access(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let unique: Vec<&String> = {
            let mut seen = std::collections::HashSet::new();
            ids.iter().filter(|id| seen.insert(id.as_str())).collect()
        };

        self.with_transaction(|conn| {
            let now = Utc::now();
            for id in unique {
                let row: Option<(String, i64)> = conn
                    .query_row(
                        "SELECT created_at, access_count FROM memories WHERE id = ?1",
                        [id.as_str()],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                let Some((created_at, access_count)) = row else {
                    continue;
                };
                let created_at = parse_dt(&created_at);
                let days_since_created = (now - created_at).num_seconds() as f64 / 86400.0;
                let new_count = access_count + 1;
                let velocity = new_count as f64 / days_since_created.max(1.0);
                conn.execute(
                    "UPDATE memories SET access_count = ?1, last_accessed_at = ?2, access_velocity = ?3 WHERE id = ?4",
                    params![new_count, now.to_rfc3339(), velocity, id.as_str()],
                )?;
            }
            Ok(())
        })
    }

    pub fn record_supersession(&self, superseding_id: &str, superseded_id: &str, reason: Option<&str>) -> Result<()> {
        self.with_transaction(|conn| {
            for id in [superseding_id, superseded_id] {
                let exists: i64 = conn.query_row("SELECT COUNT(*) FROM memories WHERE id = ?1", [id], |r| r.get(0))?;
                if exists == 0 {
                    return Err(EngramError::NotFound(format!("memory {id}")));
                }
            }
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO memory_supersession (superseding_id, superseded_id, reason, created_at) VALUES (?1,?2,?3,?4)",
                params![superseding_id, superseded_id, reason, now],
            )?;
            conn.execute(
                "UPDATE memories SET status = 'Superseded', superseded_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![superseding_id, now, superseded_id],
            )?;
            Ok(())
        })
    }

    /// Oldest-to-newest chain containing `id`: walk backward via
    /// `superseded_id = current`, then forward via `superseding_id`.
    pub fn get_supersession_chain(&self, id: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut backward = Vec::new();
            let mut current = id.to_string();
            loop {
                let prev: Option<String> = conn
                    .query_row(
                        "SELECT superseding_id FROM memory_supersession WHERE superseded_id = ?1",
                        [&current],
                        |r| r.get(0),
                    )
                    .optional()?;
                match prev {
                    Some(p) => {
                        backward.push(p.clone());
                        current = p;
                    }
                    None => break,
                }
            }
            backward.reverse();

            let mut forward = vec![id.to_string()];
            let mut current = id.to_string();
            loop {
                let next: Option<String> = conn
                    .query_row(
                        "SELECT superseded_id FROM memory_supersession WHERE superseding_id = ?1",
                        [&current],
                        |r| r.get(0),
                    )
                    .optional()?;
                match next {
                    Some(n) => {
                        forward.push(n.clone());
                        current = n;
                    }
                    None => break,
                }
            }

            backward.extend(forward);
            Ok(backward)
        })
    }

    pub fn get_superseding_memory(&self, id: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT superseding_id FROM memory_supersession WHERE superseded_id = ?1",
                    [id],
                    |r| r.get(0),
                )
                .optional()?)
        })
    }

    pub fn get_superseded_memories(&self, id: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT superseded_id FROM memory_supersession WHERE superseding_id = ?1",
            )?;
            let ids = stmt
                .query_map([id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// Idempotent: a memory that is already pinned keeps the status it held
    /// before the *first* pin, so repeated `pin_memory` calls never clobber
    /// `pre_pin_status` with `'Pinned'` itself.
    pub fn pin_memory(&self, id: &str, reason: Option<&str>) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE memories SET
                    pre_pin_status = CASE WHEN pinned = 0 THEN status ELSE pre_pin_status END,
                    pinned = 1, pinned_at = ?1, pinned_reason = ?2, status = 'Pinned'
                 WHERE id = ?3",
                params![Utc::now().to_rfc3339(), reason, id],
            )?;
            if affected == 0 {
                return Err(EngramError::NotFound(format!("memory {id}")));
            }
            Ok(())
        })
    }

    /// Restores the status the memory held before it was pinned (e.g.
    /// `Superseded`, `Archived`) instead of forcing it back to `Active`.
    /// Falls back to `Active` only when no prior status was recorded. A
    /// no-op on status for memories that are not currently pinned, so
    /// calling this twice in a row is safe.
    pub fn unpin_memory(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE memories SET
                    status = CASE WHEN pinned = 1 THEN COALESCE(pre_pin_status, 'Active') ELSE status END,
                    pinned = 0, pinned_at = NULL, pinned_reason = NULL, pre_pin_status = NULL
                 WHERE id = ?1",
                [id],
            )?;
            if affected == 0 {
                return Err(EngramError::NotFound(format!("memory {id}")));
            }
            Ok(())
        })
    }

    /// Deletes each candidate whose provenance reference count is zero.
    /// Never touches artifacts with remaining references, never touches
    /// artifacts that were never provenance-tracked but still have
    /// references elsewhere.
    pub fn garbage_collect_candidates(&self, node_ids: &[String], edge_ids: &[String]) -> Result<(u64, u64)> {
        self.with_transaction(|conn| {
            let mut nodes_deleted = 0u64;
            for node_id in node_ids {
                let refs: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM memory_nodes WHERE node_id = ?1",
                    [node_id],
                    |r| r.get(0),
                )?;
                if refs == 0 {
                    let affected = conn.execute("DELETE FROM nodes WHERE id = ?1", [node_id])?;
                    nodes_deleted += affected as u64;
                }
            }

            let mut edges_deleted = 0u64;
            for edge_id in edge_ids {
                let refs: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM memory_edges WHERE edge_id = ?1",
                    [edge_id],
                    |r| r.get(0),
                )?;
                if refs == 0 {
                    let affected = conn.execute("DELETE FROM edges WHERE id = ?1", [edge_id])?;
                    edges_deleted += affected as u64;
                }
            }

            Ok((nodes_deleted, edges_deleted))
        })
    }
}
