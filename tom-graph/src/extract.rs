//! LLM-backed extraction of entities and relations from free text.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tom_core::ModelTier;
use tracing::debug;

use crate::errors::{GraphError, GraphResult};
use crate::llm::StructuredLlm;
use crate::models::{
    Category, ExtractedEntity, ExtractedRelation, normalize_eid, normalize_relation_name,
    relation_id,
};

const ENTITY_PROMPT: &str = "Identify the medical concepts mentioned in the text below.
For each concept return:
- name: the concept as a short canonical noun phrase
- category: one of the listed categories, or null when none clearly applies
- importance: a number from 0 to 1 for how central the concept is to the text

Categories:
{categories}

Text:
{text}";

const RELATION_PROMPT: &str = "The concepts below were extracted from the text that follows.
List the directed relationships the text states between them.
For each relationship return:
- source: the name of the concept the relationship starts from
- relation: a short verb phrase such as \"treats\", \"symptom of\" or \"located in\"
- target: the name of the concept the relationship points to
Use only the listed names. Return an empty list when the text states no relationship.

Concepts:
{entities}

Text:
{text}";

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(alias = "eid")]
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    #[serde(alias = "source_eid")]
    source: String,
    #[serde(alias = "name")]
    relation: String,
    #[serde(alias = "dest_eid")]
    target: String,
}

/// Structured extraction over a [`StructuredLlm`].
#[derive(Clone)]
pub struct Extractor {
    llm: Arc<dyn StructuredLlm>,
}

impl Extractor {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self { llm }
    }

    /// Entities with a category from the closed enum, deduplicated by eid.
    pub async fn extract_entities(
        &self,
        text: &str,
        tier: ModelTier,
    ) -> GraphResult<Vec<ExtractedEntity>> {
        let prompt = ENTITY_PROMPT
            .replace("{categories}", &category_list())
            .replace("{text}", text);
        let output = self
            .llm
            .structured_prompt(&prompt, &entity_schema(), tier)
            .await?;
        parse_entities(output)
    }

    /// Directed relations between already extracted entities.
    ///
    /// Returns an empty list without a model call when fewer than two
    /// entities are given.
    pub async fn extract_relations(
        &self,
        text: &str,
        entities: &[ExtractedEntity],
        tier: ModelTier,
    ) -> GraphResult<Vec<ExtractedRelation>> {
        if entities.len() < 2 {
            return Ok(Vec::new());
        }
        let eids: Vec<&str> = entities.iter().map(|e| e.eid.as_str()).collect();
        let listing = entities
            .iter()
            .map(|e| format!("- {} ({})", e.eid, e.category.label()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = RELATION_PROMPT
            .replace("{entities}", &listing)
            .replace("{text}", text);
        let output = self
            .llm
            .structured_prompt(&prompt, &relation_schema(&eids), tier)
            .await?;
        parse_relations(output, &eids)
    }
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| format!("- {}", c.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn entity_schema() -> Value {
    let mut categories: Vec<Value> = Category::ALL
        .iter()
        .map(|c| Value::String(c.as_str().to_string()))
        .collect();
    categories.push(Value::Null);

    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "category": {"type": ["string", "null"], "enum": categories},
                        "importance": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["name", "category", "importance"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

fn relation_schema(eids: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": {"type": "string", "enum": eids},
                        "relation": {"type": "string"},
                        "target": {"type": "string", "enum": eids}
                    },
                    "required": ["source", "relation", "target"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["relations"],
        "additionalProperties": false
    })
}

fn rows(output: Value, key: &str) -> GraphResult<Vec<Value>> {
    match output {
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(GraphError::ExtractionFailed(format!(
                "model output has no `{key}` array"
            ))),
        },
        other => Err(GraphError::ExtractionFailed(format!(
            "model output is not an object: {other}"
        ))),
    }
}

fn parse_entities(output: Value) -> GraphResult<Vec<ExtractedEntity>> {
    let mut entities: Vec<ExtractedEntity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows(output, "entities")? {
        let raw: RawEntity = match serde_json::from_value(row) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "dropping malformed entity row");
                continue;
            }
        };
        let eid = normalize_eid(&raw.name);
        if eid.is_empty() {
            continue;
        }
        let Some(category) = raw.category.as_deref().and_then(|c| c.parse::<Category>().ok())
        else {
            debug!(eid = %eid, category = ?raw.category, "dropping uncategorized entity");
            continue;
        };
        let importance = raw
            .importance
            .filter(|v| v.is_finite())
            .map_or(0.0, |v| v.clamp(0.0, 1.0) as f32);

        match index.get(&eid) {
            Some(&at) => {
                let existing = &mut entities[at];
                existing.importance = existing.importance.max(importance);
            }
            None => {
                index.insert(eid.clone(), entities.len());
                entities.push(ExtractedEntity {
                    eid,
                    category,
                    importance,
                });
            }
        }
    }

    Ok(entities)
}

fn parse_relations(output: Value, eids: &[&str]) -> GraphResult<Vec<ExtractedRelation>> {
    let known: HashSet<String> = eids.iter().map(|e| normalize_eid(e)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut relations = Vec::new();

    for row in rows(output, "relations")? {
        let raw: RawRelation = match serde_json::from_value(row) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "dropping malformed relation row");
                continue;
            }
        };
        let source_eid = normalize_eid(&raw.source);
        let dest_eid = normalize_eid(&raw.target);
        let name = normalize_relation_name(&raw.relation);

        if name.is_empty() || source_eid == dest_eid {
            continue;
        }
        if !known.contains(&source_eid) || !known.contains(&dest_eid) {
            debug!(source = %source_eid, dest = %dest_eid, "dropping relation to unknown entity");
            continue;
        }
        if !seen.insert(relation_id(&source_eid, &name, &dest_eid)) {
            continue;
        }
        relations.push(ExtractedRelation {
            source_eid,
            name,
            dest_eid,
        });
    }

    Ok(relations)
}
