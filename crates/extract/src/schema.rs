use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::BuildError;

/// Recognized entity classes. Anything else coming back from the model is
/// rejected at the parsing boundary, never coerced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Person,
    Organization,
    Geo,
    Event,
    Concept,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PERSON" => Ok(EntityType::Person),
            "ORGANIZATION" => Ok(EntityType::Organization),
            "GEO" => Ok(EntityType::Geo),
            "EVENT" => Ok(EntityType::Event),
            "CONCEPT" => Ok(EntityType::Concept),
            other => Err(UnknownEntityType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Geo => "GEO",
            EntityType::Event => "EVENT",
            EntityType::Concept => "CONCEPT",
        };
        f.write_str(s)
    }
}

/// Upper-case and collapse whitespace for identity comparison
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Canonical identity computed identically by every store-facing adapter.
/// Two extractions naming the same (name, type) pair merge, never duplicate.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CanonicalKey {
    pub name: String,
    pub entity_type: EntityType,
}

impl CanonicalKey {
    pub fn new(name: &str, entity_type: EntityType) -> Self {
        Self {
            name: canonical_name(name),
            entity_type,
        }
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.name, self.entity_type)
    }
}

/// One entity record as returned by the model, before merging
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
}

/// One relationship record as returned by the model, before resolution
#[derive(Debug, Clone)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub description: String,
    pub strength: f64,
}

/// Merged entity keyed by canonical identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub key: CanonicalKey,
    /// Original casing, kept for display
    pub display_name: String,
    pub descriptions: Vec<String>,
    /// Chunk IDs this entity was extracted from
    pub provenance: BTreeSet<String>,
}

pub const MIN_STRENGTH: f64 = 1.0;
pub const MAX_STRENGTH: f64 = 10.0;

/// Directed, strength-scored relationship between two canonical entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub source: CanonicalKey,
    pub target: CanonicalKey,
    pub description: String,
    pub strength: f64,
}

impl Triple {
    /// Strength outside [1.0, 10.0] (or non-finite) is rejected, not clamped
    pub fn new(
        source: CanonicalKey,
        target: CanonicalKey,
        description: String,
        strength: f64,
    ) -> Result<Self, BuildError> {
        if !strength.is_finite() || !(MIN_STRENGTH..=MAX_STRENGTH).contains(&strength) {
            return Err(BuildError::Validation(format!(
                "relationship strength {strength} outside [{MIN_STRENGTH}, {MAX_STRENGTH}]"
            )));
        }
        Ok(Self {
            source,
            target,
            description,
            strength,
        })
    }
}

/// Content modality an embedding was generated for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    Math,
    Code,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modality::Text => "text",
            Modality::Math => "math",
            Modality::Code => "code",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized modality: {0}")]
pub struct UnknownModality(pub String);

impl FromStr for Modality {
    type Err = UnknownModality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "math" => Ok(Modality::Math),
            "code" => Ok(Modality::Code),
            other => Err(UnknownModality(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseComponent {
    pub index: u32,
    pub weight: f32,
}

/// What a vector belongs to; determines the point key in the vector store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EmbeddingOwner {
    Chunk(String),
    Document(String),
}

impl EmbeddingOwner {
    pub fn key(&self) -> String {
        match self {
            EmbeddingOwner::Chunk(id) => format!("chunk_{id}"),
            EmbeddingOwner::Document(id) => format!("doc_{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub owner: EmbeddingOwner,
    pub vector: Vec<f32>,
    pub sparse: Option<Vec<SparseComponent>>,
    /// Model identifier and version tag, kept for re-embedding invalidation
    pub model: String,
    pub model_version: String,
    pub modality: Modality,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A document's merged entities and validated triples, ready to persist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentGraph {
    pub entities: Vec<Entity>,
    pub triples: Vec<Triple>,
}
