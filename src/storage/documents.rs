//! Document tracker (C4): dedup of raw ingested documents by exact content
//! hash, so `cognify` can skip re-chunking text it has already processed.

use chrono::Utc;

use crate::error::Result;

use super::connection::Storage;

impl Storage {
    pub fn is_processed(&self, hash: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM processed_documents WHERE hash = ?1",
                [hash],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Upsert: re-marking an already-processed hash updates `source`/
    /// `chunk_count` in place rather than inflating the processed count.
    pub fn mark_processed(&self, hash: &str, source: Option<&str>, chunk_count: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO processed_documents (hash, source, processed_at, chunk_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(hash) DO UPDATE SET
                    source = excluded.source,
                    processed_at = excluded.processed_at,
                    chunk_count = excluded.chunk_count",
                rusqlite::params![hash, source, Utc::now().to_rfc3339(), chunk_count],
            )?;
            Ok(())
        })
    }

    pub fn processed_count(&self) -> Result<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM processed_documents", [], |r| r.get(0))?)
        })
    }

    pub fn clear_processed(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM processed_documents", [])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_detects_processed() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(!storage.is_processed("h1").unwrap());
        storage.mark_processed("h1", Some("doc.md"), 3).unwrap();
        assert!(storage.is_processed("h1").unwrap());
        assert_eq!(storage.processed_count().unwrap(), 1);
    }

    #[test]
    fn re_marking_does_not_inflate_count() {
        let storage = Storage::open_in_memory().unwrap();
        storage.mark_processed("h1", Some("doc.md"), 3).unwrap();
        storage.mark_processed("h1", Some("doc.md"), 5).unwrap();
        assert_eq!(storage.processed_count().unwrap(), 1);
    }

    #[test]
    fn clear_resets_tracker() {
        let storage = Storage::open_in_memory().unwrap();
        storage.mark_processed("h1", None, 1).unwrap();
        storage.clear_processed().unwrap();
        assert_eq!(storage.processed_count().unwrap(), 0);
    }
}
