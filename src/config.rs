//! Construction-time configuration (A4). No config-file loader lives in this
//! crate — callers build an `EngineConfig` however they like and hand it to
//! the engine constructor.

use crate::types::DecayBasis;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub llm_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub db_path: String,

    pub decay_enabled: bool,
    pub decay_half_life_days: f64,
    pub decay_basis: DecayBasis,

    pub access_frequency_enabled: bool,
    pub reference_access_count: f64,
    pub access_bonus_cap: f64,

    pub prune_superseded: bool,
    pub superseded_age_days: i64,
    pub min_decay_score: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            db_path: ":memory:".to_string(),
            decay_enabled: true,
            decay_half_life_days: 30.0,
            decay_basis: DecayBasis::Access,
            access_frequency_enabled: true,
            reference_access_count: 10.0,
            access_bonus_cap: 0.5,
            prune_superseded: true,
            superseded_age_days: 30,
            min_decay_score: 0.05,
        }
    }
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}
