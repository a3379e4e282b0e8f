use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GraphError, GraphResult};

/// Payload of a store point: a flat JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Closed set of entity categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Condition,
    Symptom,
    Medication,
    Procedure,
    Imaging,
    LabTest,
    DiagnosticTest,
    Organ,
    OrganSystem,
    ClinicalFinding,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Condition,
        Category::Symptom,
        Category::Medication,
        Category::Procedure,
        Category::Imaging,
        Category::LabTest,
        Category::DiagnosticTest,
        Category::Organ,
        Category::OrganSystem,
        Category::ClinicalFinding,
    ];

    /// Stored (payload) representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Symptom => "symptom",
            Self::Medication => "medication",
            Self::Procedure => "procedure",
            Self::Imaging => "imaging",
            Self::LabTest => "lab_test",
            Self::DiagnosticTest => "diagnostic_test",
            Self::Organ => "organ",
            Self::OrganSystem => "organ_system",
            Self::ClinicalFinding => "clinical_finding",
        }
    }

    /// Human-readable label, used in prompts and embedding text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Symptom => "symptom",
            Self::Medication => "medication",
            Self::Procedure => "procedure",
            Self::Imaging => "imaging",
            Self::LabTest => "lab test",
            Self::DiagnosticTest => "diagnostic test",
            Self::Organ => "organ",
            Self::OrganSystem => "organ system",
            Self::ClinicalFinding => "clinical finding",
        }
    }
}

impl FromStr for Category {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == key)
            .ok_or_else(|| GraphError::InvalidPayload(format!("unknown category: {s}")))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator partitioning the collection into two logical tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Relation,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relation => "relation",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named vector fields carried by every point.
///
/// The two fields encode different things depending on the node kind:
///
/// | kind     | `primary`            | `secondary`                     |
/// |----------|----------------------|---------------------------------|
/// | entity   | identity (the eid)   | context (`"<category>: <eid>"`) |
/// | relation | the relation name    | the rid                         |
///
/// Searching relations by `primary` therefore finds edges with a similar
/// *name*, not edges between similar entities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VectorField {
    Primary,
    Secondary,
}

impl VectorField {
    pub const ALL: [VectorField; 2] = [VectorField::Primary, VectorField::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl FromStr for VectorField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            _ => Err(format!("unknown vector field: {s}")),
        }
    }
}

impl std::fmt::Display for VectorField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph node representing one extracted concept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub eid: String,
    pub category: Category,
    /// Extraction importance in [0, 1], kept as payload metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,
}

/// A directed, named edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub rid: String,
    pub name: String,
    pub source_eid: String,
    pub dest_eid: String,
}

impl Relation {
    /// Build a relation with a normalized name and its derived rid.
    pub fn new(source_eid: &str, name: &str, dest_eid: &str) -> Self {
        let source_eid = normalize_eid(source_eid);
        let dest_eid = normalize_eid(dest_eid);
        let name = normalize_relation_name(name);
        Self {
            rid: relation_id(&source_eid, &name, &dest_eid),
            name,
            source_eid,
            dest_eid,
        }
    }
}

/// Tagged node stored as a point payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Entity(Entity),
    Relation(Relation),
}

impl Node {
    /// Store point id: the eid for entities, the rid for relations.
    pub fn id(&self) -> &str {
        match self {
            Node::Entity(entity) => &entity.eid,
            Node::Relation(relation) => &relation.rid,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Entity(_) => NodeKind::Entity,
            Node::Relation(_) => NodeKind::Relation,
        }
    }

    pub fn payload(&self) -> GraphResult<Payload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(GraphError::InvalidPayload(format!(
                "node serialized to non-object: {other}"
            ))),
        }
    }

    pub fn into_point(self, vectors: NodeVectors) -> GraphResult<Point> {
        Ok(Point {
            id: self.id().to_string(),
            payload: self.payload()?,
            vectors: Some(vectors.into()),
        })
    }

    pub fn from_point(point: &Point) -> GraphResult<Self> {
        let node: Node = serde_json::from_value(Value::Object(point.payload.clone()))
            .map_err(|e| GraphError::InvalidPayload(format!("point {}: {e}", point.id)))?;
        if node.id() != point.id {
            return Err(GraphError::InvalidPayload(format!(
                "point id {} does not match payload id {}",
                point.id,
                node.id()
            )));
        }
        Ok(node)
    }
}

impl TryFrom<&Point> for Entity {
    type Error = GraphError;

    fn try_from(point: &Point) -> Result<Self, Self::Error> {
        match Node::from_point(point)? {
            Node::Entity(entity) => Ok(entity),
            Node::Relation(_) => Err(GraphError::InvalidPayload(format!(
                "point {} is a relation, expected an entity",
                point.id
            ))),
        }
    }
}

impl TryFrom<&Point> for Relation {
    type Error = GraphError;

    fn try_from(point: &Point) -> Result<Self, Self::Error> {
        match Node::from_point(point)? {
            Node::Relation(relation) => Ok(relation),
            Node::Entity(_) => Err(GraphError::InvalidPayload(format!(
                "point {} is an entity, expected a relation",
                point.id
            ))),
        }
    }
}

/// The two embeddings of a node. Both are non-empty and equally sized.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeVectors {
    primary: Vec<f32>,
    secondary: Vec<f32>,
}

impl NodeVectors {
    pub fn new(primary: Vec<f32>, secondary: Vec<f32>) -> GraphResult<Self> {
        if primary.is_empty() {
            return Err(GraphError::Embedding("primary vector is empty".to_string()));
        }
        if primary.len() != secondary.len() {
            return Err(GraphError::EmbeddingDimMismatch {
                expected: primary.len(),
                actual: secondary.len(),
            });
        }
        Ok(Self { primary, secondary })
    }

    pub fn dim(&self) -> usize {
        self.primary.len()
    }

    pub fn primary(&self) -> &[f32] {
        &self.primary
    }

    pub fn secondary(&self) -> &[f32] {
        &self.secondary
    }
}

impl From<NodeVectors> for PointVectors {
    fn from(value: NodeVectors) -> Self {
        let mut map = BTreeMap::new();
        map.insert(VectorField::Primary.as_str().to_string(), value.primary);
        map.insert(VectorField::Secondary.as_str().to_string(), value.secondary);
        PointVectors::Named(map)
    }
}

/// A raw store point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub id: String,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<PointVectors>,
}

/// Vector data as a store may return it: a single unnamed vector or a
/// map of named vectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PointVectors {
    Single(Vec<f32>),
    Named(BTreeMap<String, Vec<f32>>),
}

impl PointVectors {
    /// Vector for `field`. A single unnamed vector stands for `primary`.
    pub fn get(&self, field: VectorField) -> Option<&[f32]> {
        match self {
            PointVectors::Single(vector) => {
                (field == VectorField::Primary).then_some(vector.as_slice())
            }
            PointVectors::Named(map) => map.get(field.as_str()).map(Vec::as_slice),
        }
    }

    /// Named form, as backends persist it. A single vector becomes `primary`.
    pub fn into_named(self) -> Self {
        match self {
            PointVectors::Single(vector) => PointVectors::Named(BTreeMap::from([(
                VectorField::Primary.as_str().to_string(),
                vector,
            )])),
            named => named,
        }
    }

    pub fn get_named(&self, name: &str) -> Option<&[f32]> {
        match self {
            PointVectors::Single(vector) => {
                (name == VectorField::Primary.as_str()).then_some(vector.as_slice())
            }
            PointVectors::Named(map) => map.get(name).map(Vec::as_slice),
        }
    }
}

/// A point returned by a similarity search. Higher scores are closer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub point: Point,
    pub score: f32,
}

/// A typed search hit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub item: T,
    pub score: f32,
}

/// Entity candidate produced by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub eid: String,
    pub category: Category,
    pub importance: f32,
}

impl ExtractedEntity {
    pub fn to_entity(&self) -> Entity {
        Entity {
            eid: self.eid.clone(),
            category: self.category,
            importance: Some(self.importance),
        }
    }
}

/// Relation triple produced by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExtractedRelation {
    pub source_eid: String,
    pub name: String,
    pub dest_eid: String,
}

impl ExtractedRelation {
    pub fn to_relation(&self) -> Relation {
        Relation::new(&self.source_eid, &self.name, &self.dest_eid)
    }
}

/// Lower-case, trim, and collapse internal whitespace.
pub fn normalize_eid(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lower-case snake form of a relation name (`"Symptom of"` -> `symptom_of`).
pub fn normalize_relation_name(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Deterministic relation id, so re-ingesting a triple overwrites it.
pub fn relation_id(source_eid: &str, name: &str, dest_eid: &str) -> String {
    format!("{source_eid} -[{name}]-> {dest_eid}")
}
