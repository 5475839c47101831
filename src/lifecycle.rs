//! Lifecycle policies (C10): time decay, retention-policy half-lives,
//! access-frequency reinforcement, and the two-phase prune (memory-level,
//! then node-level) that uses them.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::Storage;
use crate::types::{DecayBasis, Memory, MemoryStatus, Node, PruneOptions, PruneResult, RetentionPolicy};

/// `decay(age, half_life) = 0.5 ^ (age / half_life)`, clamped so malformed
/// inputs never decay rather than producing NaN or a negative score.
pub fn decay(age_days: f64, half_life_days: f64) -> f64 {
    if age_days < 0.0 || half_life_days <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_days / half_life_days).clamp(0.0, 1.0)
}

fn age_days(reference: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - reference).num_seconds() as f64 / 86400.0
}

/// Age in days per the configured basis: `Access` measures from
/// `last_accessed_at` when set, falling back to `created_at`; `Creation`
/// always uses `created_at`.
pub fn node_age_days(node: &Node, basis: DecayBasis, now: DateTime<Utc>) -> f64 {
    let reference = match basis {
        DecayBasis::Access => node.last_accessed_at.unwrap_or(node.created_at),
        DecayBasis::Creation => node.created_at,
    };
    age_days(reference, now)
}

/// `multiplier := multiplier * (1 + min(cap, velocity / reference_velocity))`.
fn apply_access_bonus(multiplier: f64, velocity: f64, config: &EngineConfig) -> f64 {
    if config.reference_access_count <= 0.0 {
        return multiplier;
    }
    let bonus = (velocity / config.reference_access_count).clamp(0.0, config.access_bonus_cap);
    multiplier * (1.0 + bonus)
}

/// Effective decay multiplier for a node, in `[0, 1]` before the
/// access-frequency bonus and possibly above 1 after it.
///
/// When the node's owning memory is known, its retention policy overrides
/// the half-life and its `access_velocity` drives the frequency bonus;
/// pinned/`Pinned`-status and `permanent`-policy memories are exempt from
/// decay entirely. With no owning memory, the node falls back to the
/// engine's default half-life and a velocity derived from its own
/// `access_count`.
pub fn decay_multiplier(node: &Node, owning_memory: Option<&Memory>, config: &EngineConfig, now: DateTime<Utc>) -> f64 {
    if !config.decay_enabled {
        return 1.0;
    }

    if let Some(memory) = owning_memory {
        if memory.pinned || memory.status == MemoryStatus::Pinned {
            return 1.0;
        }
        let Some(half_life) = memory.retention_policy.half_life_days(config.decay_half_life_days) else {
            return 1.0; // permanent
        };
        let mut multiplier = decay(node_age_days(node, config.decay_basis, now), half_life);
        if config.access_frequency_enabled {
            multiplier = apply_access_bonus(multiplier, memory.access_velocity, config);
        }
        multiplier
    } else {
        let mut multiplier = decay(node_age_days(node, config.decay_basis, now), config.decay_half_life_days);
        if config.access_frequency_enabled {
            let creation_age = node_age_days(node, DecayBasis::Creation, now).max(1.0);
            let velocity = node.access_count as f64 / creation_age;
            multiplier = apply_access_bonus(multiplier, velocity, config);
        }
        multiplier
    }
}

/// Whether a superseded memory has aged past the configured grace period
/// (or `force` waives it).
fn supersession_is_prunable(memory: &Memory, options: &PruneOptions, now: DateTime<Utc>) -> bool {
    if memory.status != MemoryStatus::Superseded || !options.prune_superseded {
        return false;
    }
    // `updated_at` is set to the supersession time by `record_supersession`,
    // so it stands in for "time since this memory was superseded" (an Open
    // Question the distilled spec leaves parameterized; see DESIGN.md).
    options.force || age_days(memory.updated_at, now) >= options.superseded_age_days as f64
}

fn memory_is_prunable(memory: &Memory, options: &PruneOptions, now: DateTime<Utc>) -> bool {
    if memory.pinned || memory.status == MemoryStatus::Pinned || memory.retention_policy == RetentionPolicy::Permanent {
        return false;
    }
    if supersession_is_prunable(memory, options, now) {
        return true;
    }
    if let Some(retention_until) = memory.retention_until {
        if retention_until < now {
            return true;
        }
    }
    false
}

/// Phase 1 (memory-level) then Phase 2 (node-level) of `prune`. Every
/// counter is computed whether or not `options.dry_run` is set; writes only
/// happen when it is not.
pub fn prune(storage: &Storage, config: &EngineConfig, options: &PruneOptions) -> Result<PruneResult> {
    let now = Utc::now();
    let mut result = PruneResult {
        dry_run: options.dry_run,
        ..Default::default()
    };

    for memory in storage.all_memories()? {
        result.memories_evaluated += 1;
        if !memory_is_prunable(&memory, options, now) {
            continue;
        }

        result.memories_pruned += 1;
        if memory.status == MemoryStatus::Superseded {
            result.superseded_memories_pruned += 1;
        }
        if !options.dry_run {
            let (node_ids, edge_ids) = storage.get_provenance_by_memory(&memory.id)?;
            storage.delete_memory(&memory.id)?;
            storage.garbage_collect_candidates(&node_ids, &edge_ids)?;
        }
    }

    for node in storage.get_all_nodes()? {
        let owner_ids = storage.get_memories_by_node_id(&node.id)?;
        let owners: Vec<Memory> = owner_ids.iter().filter_map(|id| storage.peek_memory(id).ok()).collect();

        if owners.iter().any(|m| m.pinned || m.status == MemoryStatus::Pinned) {
            continue;
        }
        if !owners.is_empty() && owners.iter().all(|m| m.retention_policy == RetentionPolicy::Permanent) {
            continue;
        }

        let age = node_age_days(&node, DecayBasis::Creation, now);
        let score = decay_multiplier(&node, owners.first(), config, now);
        let eligible = options.max_age_days.is_some_and(|max| age >= max as f64) || score < config.min_decay_score;
        if !eligible {
            continue;
        }

        result.nodes_pruned += 1;
        let incident_edges = storage.get_edges(&node.id)?;
        result.edges_pruned += incident_edges.len() as u64;

        if !options.dry_run {
            storage.vector_delete(&node.id)?;
            for edge in incident_edges {
                storage.delete_edge(&edge.id)?;
            }
            storage.delete_node(&node.id)?;
        }
    }

    Ok(result)
}
