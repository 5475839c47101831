//! Sequential schema migrations (A1), following the teacher's
//! `SCHEMA_VERSION` + `migrate_vN` chain: each migration is idempotent
//! against a fresh database and runs inside its own transaction.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 4;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current_version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |r| {
            r.get(0)
        })
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
        record_version(conn, 1)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
        record_version(conn, 2)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
        record_version(conn, 3)?;
    }
    if current_version < 4 {
        migrate_v4(conn)?;
        record_version(conn, 4)?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

/// Graph store + document tracker: nodes, edges, processed_documents.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE nodes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            embedding BLOB,
            created_at TEXT NOT NULL,
            last_accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX idx_nodes_name_ci ON nodes (name COLLATE NOCASE);

        CREATE TABLE edges (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            relation TEXT NOT NULL,
            target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            weight REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_edges_source ON edges (source_id);
        CREATE INDEX idx_edges_target ON edges (target_id);

        CREATE TABLE processed_documents (
            hash TEXT PRIMARY KEY,
            source TEXT,
            processed_at TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;
    Ok(())
}

/// Memory store: memories, provenance junctions, supersession.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE memories (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            context TEXT NOT NULL,
            decisions TEXT NOT NULL DEFAULT '[]',
            rationale TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            doc_hash TEXT NOT NULL,
            source TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT,
            access_velocity REAL NOT NULL DEFAULT 0.0,
            superseded_by TEXT,
            retention_policy TEXT NOT NULL DEFAULT 'standard',
            retention_until TEXT,
            pinned INTEGER NOT NULL DEFAULT 0,
            pinned_at TEXT,
            pinned_reason TEXT
        );
        CREATE INDEX idx_memories_doc_hash ON memories (doc_hash);
        CREATE INDEX idx_memories_status ON memories (status);

        CREATE TABLE memory_nodes (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (memory_id, node_id)
        );
        CREATE INDEX idx_memory_nodes_node ON memory_nodes (node_id);

        CREATE TABLE memory_edges (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (memory_id, edge_id)
        );
        CREATE INDEX idx_memory_edges_edge ON memory_edges (edge_id);

        CREATE TABLE memory_supersession (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            superseding_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            superseded_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            reason TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_supersession_superseding ON memory_supersession (superseding_id);
        CREATE INDEX idx_supersession_superseded ON memory_supersession (superseded_id);
        "#,
    )?;
    Ok(())
}

/// Vector store: the `vec0` ANN virtual table plus the explicit
/// rowid<->node-id mapping that lets us keep stable string ids while
/// `vec0` requires integer rowids.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE vec_node_ids (
            rowid INTEGER PRIMARY KEY,
            node_id TEXT NOT NULL UNIQUE REFERENCES nodes(id) ON DELETE CASCADE
        );
        "#,
    )?;
    // Dimension is fixed at creation time; 1536 matches the default
    // embedding_model output size (EngineConfig::embedding_dimensions).
    // The vtab is created here with that default; callers embedding at a
    // different dimension must migrate separately (documented in DESIGN.md
    // as an accepted limitation of a single fixed-dimension ANN index).
    conn.execute_batch("CREATE VIRTUAL TABLE vec_nodes USING vec0(embedding FLOAT[1536]);")?;
    Ok(())
}

/// Lets `unpin_memory` restore the status a memory actually held before it
/// was pinned, instead of hardcoding `Active` for memories that were
/// `Superseded`/`Archived` when pinned.
fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE memories ADD COLUMN pre_pin_status TEXT;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> Connection {
        super::super::connection::ensure_vec_extension_registered();
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_connection();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn creates_expected_tables() {
        let conn = test_connection();
        run_migrations(&conn).unwrap();
        for table in [
            "nodes",
            "edges",
            "processed_documents",
            "memories",
            "memory_nodes",
            "memory_edges",
            "memory_supersession",
            "vec_node_ids",
        ] {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "table {table} should exist");
        }
    }
}
