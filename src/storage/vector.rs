//! Vector store (C3): nearest-neighbor search backed by the `sqlite-vec`
//! `vec0` virtual table. `vec0` requires integer rowids, so `vec_node_ids`
//! maps our stable string node ids to the rowids it expects; `add` keeps
//! both tables and `nodes.embedding` in sync inside one transaction.

use rusqlite::{params, OptionalExtension};

use crate::codec::{encode_embedding, score_from_distance};
use crate::error::{EngramError, Result};

use super::connection::Storage;

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub node_id: String,
    pub score: f32,
}

impl Storage {
    /// Insert or replace the embedding for `node_id`. Any prior ANN row is
    /// removed first so a re-embed never leaves a stale ANN entry behind.
    /// Rejects an empty embedding and a `node_id` with no matching node
    /// (§4.3: "verify node exists", "embedding must be non-empty").
    pub fn vector_add(&self, node_id: &str, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(EngramError::Validation("embedding must not be empty".into()));
        }
        if !self.node_exists(node_id)? {
            return Err(EngramError::Dependency(format!("node {node_id} does not exist")));
        }

        let blob = encode_embedding(embedding);

        self.with_transaction(|conn| {
            let existing_rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM vec_node_ids WHERE node_id = ?1",
                    [node_id],
                    |r| r.get(0),
                )
                .optional()?;

            if let Some(rowid) = existing_rowid {
                conn.execute("DELETE FROM vec_nodes WHERE rowid = ?1", [rowid])?;
                conn.execute(
                    "INSERT INTO vec_nodes (rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, blob],
                )?;
            } else {
                conn.execute(
                    "INSERT INTO vec_nodes (embedding) VALUES (?1)",
                    params![blob],
                )?;
                let rowid = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO vec_node_ids (rowid, node_id) VALUES (?1, ?2)",
                    params![rowid, node_id],
                )?;
            }

            conn.execute(
                "UPDATE nodes SET embedding = ?1 WHERE id = ?2",
                params![blob, node_id],
            )?;
            Ok(())
        })
    }

    /// Approximate nearest neighbors by cosine distance, closest first.
    /// `score` is `1.0 - distance` (codec::score_from_distance), so higher
    /// is more similar, matching the vector-score convention used by
    /// hybrid search's additive merge.
    pub fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let blob = encode_embedding(query);

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT vi.node_id, vn.distance
                 FROM vec_nodes vn
                 JOIN vec_node_ids vi ON vi.rowid = vn.rowid
                 WHERE vn.embedding MATCH ?1 AND k = ?2
                 ORDER BY vn.distance ASC",
            )?;
            let rows = stmt.query_map(params![blob, top_k as i64], |row| {
                let node_id: String = row.get(0)?;
                let distance: f32 = row.get(1)?;
                Ok(VectorMatch {
                    node_id,
                    score: score_from_distance(distance),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn vector_delete(&self, node_id: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM vec_node_ids WHERE node_id = ?1",
                    [node_id],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(rowid) = rowid {
                conn.execute("DELETE FROM vec_nodes WHERE rowid = ?1", [rowid])?;
                conn.execute("DELETE FROM vec_node_ids WHERE rowid = ?1", [rowid])?;
            }
            conn.execute(
                "UPDATE nodes SET embedding = NULL WHERE id = ?1",
                [node_id],
            )?;
            Ok(())
        })
    }

    /// No dedicated handle to release; the connection lives for the life of
    /// `Storage`. Kept so callers that model an explicit vector-store
    /// lifecycle (per spec C3) have a symmetrical no-op to call.
    pub fn vector_close(&self) -> Result<()> {
        Ok(())
    }
}
