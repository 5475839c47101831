//! Extraction pipeline (C7): entity and relation extraction against a chunk
//! of text, driven by `LlmClient::complete_with_schema` rather than the
//! teacher's regex-based NER — this is the one pipeline stage where the
//! spec requires LLM-schema extraction instead of pattern matching.

use std::collections::HashMap;

use serde::Deserialize;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::ids::normalize_name;
use crate::llm::LlmClient;
use crate::llm::LlmTransport;
use crate::types::EntityType;

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedTriplet {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawEntities {
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawTriplet {
    subject: String,
    relation: String,
    object: String,
}

#[derive(Debug, Deserialize)]
struct RawTriplets {
    triplets: Vec<RawTriplet>,
}

/// Extracts entities from `chunk`, coercing any type outside the 16-member
/// allowlist to `Concept` (logging once per occurrence without leaking the
/// entity's name or description) and dropping entities with an empty name
/// or description.
pub async fn extract_entities<T: LlmTransport>(
    client: &LlmClient<T>,
    chunk: &str,
    cancel: &CancellationToken,
) -> Result<Vec<ExtractedEntity>> {
    let prompt = format!(
        "Extract named entities from the following text. Return JSON matching \
         {{\"entities\": [{{\"name\": str, \"type\": str, \"description\": str}}]}}. \
         Allowed types: {}.\n\nText:\n{chunk}",
        EntityType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "),
    );

    let raw: RawEntities = client.complete_with_schema(&prompt, cancel).await?;

    let mut entities = Vec::with_capacity(raw.entities.len());
    for (index, entity) in raw.entities.into_iter().enumerate() {
        if entity.name.trim().is_empty() || entity.description.trim().is_empty() {
            continue;
        }
        let entity_type = match entity.entity_type.parse::<EntityType>() {
            Ok(t) => t,
            Err(()) => {
                tracing::warn!(
                    raw_type = %entity.entity_type,
                    entity_index = index,
                    "extracted entity type not in allowlist, coercing to Concept"
                );
                EntityType::Concept
            }
        };
        entities.push(ExtractedEntity {
            name: entity.name,
            entity_type,
            description: entity.description,
        });
    }
    Ok(entities)
}

/// Extracts relation triplets from `chunk`, resolving `subject`/`object`
/// against `known_entities` by case-insensitive, whitespace-normalized name
/// match. A name that maps to more than one distinct entity type is
/// ambiguous; triplets referencing an unknown or ambiguous name are dropped.
pub async fn extract_relations<T: LlmTransport>(
    client: &LlmClient<T>,
    chunk: &str,
    known_entities: &[ExtractedEntity],
    cancel: &CancellationToken,
) -> Result<(Vec<ExtractedTriplet>, Vec<String>)> {
    let entity_names: Vec<&str> = known_entities.iter().map(|e| e.name.as_str()).collect();
    let prompt = format!(
        "Extract relation triplets (subject, relation, object) between these entities: {}.\n\
         Return JSON matching {{\"triplets\": [{{\"subject\": str, \"relation\": str, \"object\": str}}]}}.\n\n\
         Text:\n{chunk}",
        entity_names.join(", "),
    );

    let raw: RawTriplets = client.complete_with_schema(&prompt, cancel).await?;

    let name_map = build_name_type_map(known_entities);

    let mut triplets = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut skipped_reasons = Vec::new();

    for triplet in raw.triplets {
        let subject = triplet.subject.trim().to_string();
        let relation = triplet.relation.trim().to_string();
        let object = triplet.object.trim().to_string();

        if subject.is_empty() || relation.is_empty() || object.is_empty() {
            continue;
        }

        if !resolves_uniquely(&name_map, &subject) {
            skipped_reasons.push(format!("skipped edge: subject '{subject}' is unknown or ambiguous"));
            continue;
        }
        if !resolves_uniquely(&name_map, &object) {
            skipped_reasons.push(format!("skipped edge: object '{object}' is unknown or ambiguous"));
            continue;
        }

        let dedup_key = (
            normalize_name(&subject),
            relation.to_lowercase(),
            normalize_name(&object),
        );
        if !seen.insert(dedup_key) {
            continue;
        }

        triplets.push(ExtractedTriplet { subject, relation, object });
    }

    Ok((triplets, skipped_reasons))
}

/// Maps normalized name -> the distinct entity types seen under it. A name
/// collapsing to more than one type is ambiguous and cannot be resolved.
fn build_name_type_map(known_entities: &[ExtractedEntity]) -> HashMap<String, Vec<EntityType>> {
    let mut map: HashMap<String, Vec<EntityType>> = HashMap::new();
    for entity in known_entities {
        let types = map.entry(normalize_name(&entity.name)).or_default();
        if !types.contains(&entity.entity_type) {
            types.push(entity.entity_type);
        }
    }
    map
}

fn resolves_uniquely(name_map: &HashMap<String, Vec<EntityType>>, candidate: &str) -> bool {
    matches!(name_map.get(&normalize_name(candidate)).map(|v| v.len()), Some(1))
}
