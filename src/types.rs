//! Core domain types: nodes, edges, documents, memories, and the option
//! structs that replace ad-hoc keyword arguments at every public call site.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The fixed sixteen-member entity type allowlist (§4.7). Anything the
/// extractor returns outside this set is coerced to `Concept` before it
/// ever reaches the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Concept,
    System,
    Decision,
    Event,
    Technology,
    Pattern,
    Problem,
    Goal,
    Location,
    Organization,
    Document,
    Process,
    Requirement,
    Feature,
    Task,
}

impl EntityType {
    pub const ALL: [EntityType; 16] = [
        EntityType::Person,
        EntityType::Concept,
        EntityType::System,
        EntityType::Decision,
        EntityType::Event,
        EntityType::Technology,
        EntityType::Pattern,
        EntityType::Problem,
        EntityType::Goal,
        EntityType::Location,
        EntityType::Organization,
        EntityType::Document,
        EntityType::Process,
        EntityType::Requirement,
        EntityType::Feature,
        EntityType::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Concept => "Concept",
            EntityType::System => "System",
            EntityType::Decision => "Decision",
            EntityType::Event => "Event",
            EntityType::Technology => "Technology",
            EntityType::Pattern => "Pattern",
            EntityType::Problem => "Problem",
            EntityType::Goal => "Goal",
            EntityType::Location => "Location",
            EntityType::Organization => "Organization",
            EntityType::Document => "Document",
            EntityType::Process => "Process",
            EntityType::Requirement => "Requirement",
            EntityType::Feature => "Feature",
            EntityType::Task => "Task",
        }
    }
}

impl FromStr for EntityType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// A node in the knowledge graph: a distilled entity with a stable,
/// content-derived identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: EntityType,
    pub description: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub metadata: HashMap<String, Value>,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: EntityType, description: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            node_type,
            description: description.into(),
            embedding: None,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            metadata: HashMap::new(),
        }
    }
}

/// An undirected (for traversal purposes) relation between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub relation: String,
    pub target_id: String,
    pub weight: f32,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, relation: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            source_id: source_id.into(),
            relation: relation.into(),
            target_id: target_id.into(),
            weight: 1.0,
            created_at: Utc::now(),
        }
    }
}

/// Tracking row for deduplicating raw ingested documents by exact content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub hash: String,
    pub source: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MemoryStatus {
    Pending,
    Complete,
    Active,
    Superseded,
    Archived,
    Pinned,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Pending => "pending",
            MemoryStatus::Complete => "complete",
            MemoryStatus::Active => "Active",
            MemoryStatus::Superseded => "Superseded",
            MemoryStatus::Archived => "Archived",
            MemoryStatus::Pinned => "Pinned",
        }
    }
}

impl FromStr for MemoryStatus {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "pending" => MemoryStatus::Pending,
            "complete" => MemoryStatus::Complete,
            "Active" => MemoryStatus::Active,
            "Superseded" => MemoryStatus::Superseded,
            "Archived" => MemoryStatus::Archived,
            "Pinned" => MemoryStatus::Pinned,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Permanent,
    Decision,
    Standard,
    Ephemeral,
    Session,
}

impl RetentionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::Permanent => "permanent",
            RetentionPolicy::Decision => "decision",
            RetentionPolicy::Standard => "standard",
            RetentionPolicy::Ephemeral => "ephemeral",
            RetentionPolicy::Session => "session",
        }
    }

    /// Effective half-life in days, per §4.10's retention table. `None` means
    /// "never decays" (permanent policy).
    pub fn half_life_days(&self, default_standard_half_life: f64) -> Option<f64> {
        match self {
            RetentionPolicy::Permanent => None,
            RetentionPolicy::Decision => Some(365.0),
            RetentionPolicy::Standard => Some(default_standard_half_life),
            RetentionPolicy::Ephemeral => Some(7.0),
            RetentionPolicy::Session => Some(1.0),
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "permanent" => RetentionPolicy::Permanent,
            "decision" => RetentionPolicy::Decision,
            "standard" => RetentionPolicy::Standard,
            "ephemeral" => RetentionPolicy::Ephemeral,
            "session" => RetentionPolicy::Session,
            _ => return Err(()),
        })
    }
}

/// A first-class, versioned knowledge unit that owns derived graph artifacts
/// through provenance junctions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub topic: String,
    pub context: String,
    pub decisions: Vec<String>,
    pub rationale: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub doc_hash: String,
    pub source: Option<String>,
    pub version: i64,
    pub status: MemoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_velocity: f64,
    pub superseded_by: Option<String>,
    pub retention_policy: RetentionPolicy,
    pub retention_until: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub pinned_reason: Option<String>,
}

/// Canonical hash of the content fields that define a memory's identity.
/// Metadata is deliberately excluded so tagging a memory never changes its
/// deduplication key.
pub fn compute_doc_hash(topic: &str, context: &str, decisions: &[String], rationale: &[String]) -> String {
    use sha2::{Digest, Sha256};

    #[derive(Serialize)]
    struct Canonical<'a> {
        context: &'a str,
        decisions: &'a [String],
        rationale: &'a [String],
        topic: &'a str,
    }

    let canonical = Canonical {
        context: context.trim(),
        decisions,
        rationale,
        topic: topic.trim(),
    };
    // serde_json preserves struct field declaration order; the fields above
    // are declared alphabetically so the encoded object is already sorted.
    let encoded = serde_json::to_vec(&canonical).expect("canonical memory struct always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

/// Input to `add_memory`.
#[derive(Debug, Clone, Default)]
pub struct CreateMemoryInput {
    pub topic: String,
    pub context: String,
    pub decisions: Vec<String>,
    pub rationale: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub source: Option<String>,
    pub retention_policy: Option<RetentionPolicy>,
    pub supersedes: Vec<String>,
}

/// Presence-aware partial update: a field left as `None` is untouched, while
/// `Some(None)` clears an optional field (mirrors the teacher's
/// `UpdateMemoryInput` double-option convention).
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryPatch {
    pub topic: Option<String>,
    pub context: Option<String>,
    pub decisions: Option<Vec<String>>,
    pub rationale: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, Value>>,
    pub retention_policy: Option<RetentionPolicy>,
    pub retention_until: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    AccessCount,
    LastAccessedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct ListMemoriesOptions {
    pub status: Option<MemoryStatus>,
    pub retention_policy: Option<RetentionPolicy>,
    pub pinned: Option<bool>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListMemoriesOptions {
    fn default() -> Self {
        Self {
            status: None,
            retention_policy: None,
            pinned: None,
            sort_field: SortField::UpdatedAt,
            sort_order: SortOrder::Desc,
            limit: 50,
            offset: 0,
        }
    }
}

/// Summary row returned by `list_memories`: a truncated preview instead of
/// the full context/decisions/rationale payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: String,
    pub topic: String,
    pub preview: String,
    pub decision_count: usize,
    pub status: MemoryStatus,
    pub retention_policy: RetentionPolicy,
    pub pinned: bool,
    pub access_count: i64,
    pub superseded_by: Option<String>,
}

pub fn truncate_preview(context: &str) -> String {
    const MAX: usize = 200;
    if context.chars().count() <= MAX {
        return context.to_string();
    }
    let truncated: String = context.chars().take(MAX).collect();
    format!("{truncated}...")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Vector,
    Graph,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub search_type: SearchType,
    pub top_k: usize,
    pub depth: usize,
    pub seed_node_ids: Vec<String>,
    pub include_memory_ids: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_type: SearchType::Hybrid,
            top_k: 10,
            depth: 1,
            seed_node_ids: Vec::new(),
            include_memory_ids: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Vector,
    Graph,
    Hybrid,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Vector => "vector",
            MatchSource::Graph => "graph",
            MatchSource::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub node: Node,
    pub score: f64,
    pub source: MatchSource,
    pub depth: Option<usize>,
    pub memory_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayBasis {
    Access,
    Creation,
}

#[derive(Debug, Clone)]
pub struct CognifyOptions {
    pub skip_processed: bool,
    pub force: bool,
}

impl Default for CognifyOptions {
    fn default() -> Self {
        Self {
            skip_processed: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CognifyResult {
    pub documents_processed: u64,
    pub documents_skipped: u64,
    pub chunks_processed: u64,
    pub chunks_failed: u64,
    pub nodes_created: u64,
    pub edges_created: u64,
    pub edges_skipped: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddMemoryResult {
    pub memory_id: String,
    pub nodes_created: u64,
    pub edges_created: u64,
    pub memories_superseded: u64,
    pub status: MemoryStatus,
}

#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub dry_run: bool,
    pub force: bool,
    pub max_age_days: Option<i64>,
    pub prune_superseded: bool,
    pub superseded_age_days: i64,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            max_age_days: None,
            prune_superseded: true,
            superseded_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneResult {
    pub memories_pruned: u64,
    pub superseded_memories_pruned: u64,
    pub memories_evaluated: u64,
    pub nodes_pruned: u64,
    pub edges_pruned: u64,
    pub dry_run: bool,
}

pub fn new_memory_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_hash_ignores_outer_whitespace_and_metadata() {
        let a = compute_doc_hash("  topic  ", "context here", &[], &[]);
        let b = compute_doc_hash("topic", "context here", &[], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn doc_hash_sensitive_to_interior_change() {
        let a = compute_doc_hash("topic", "context here", &[], &[]);
        let b = compute_doc_hash("topic", "context there", &[], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn entity_type_roundtrips_case_insensitively() {
        assert_eq!("technology".parse::<EntityType>().unwrap(), EntityType::Technology);
        assert!("not-a-type".parse::<EntityType>().is_err());
    }

    #[test]
    fn preview_truncates_with_ellipsis() {
        let long = "a".repeat(250);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), 203);
        assert!(preview.ends_with("..."));

        let short = "short context";
        assert_eq!(truncate_preview(short), short);
    }
}
