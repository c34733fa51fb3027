use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::error::BuildError;
use crate::schema::{
    CanonicalKey, DocumentGraph, Entity, ExtractedEntity, ExtractedRelationship, Triple,
    canonical_name,
};

/// Accumulates per-chunk extraction output into one merged, validated
/// document graph. Entities sharing a canonical (name, type) identity are
/// merged; relationships are resolved against the merged entity set when
/// the builder finishes.
#[derive(Default)]
pub struct GraphBuilder {
    entities: HashMap<CanonicalKey, Entity>,
    pending: Vec<ExtractedRelationship>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entities(&mut self, chunk_id: &str, extracted: Vec<ExtractedEntity>) {
        for entity in extracted {
            self.add_entity(chunk_id, entity);
        }
    }

    fn add_entity(&mut self, chunk_id: &str, extracted: ExtractedEntity) {
        let key = CanonicalKey::new(&extracted.name, extracted.entity_type);
        let entry = self.entities.entry(key.clone()).or_insert_with(|| Entity {
            key,
            display_name: extracted.name.clone(),
            descriptions: Vec::new(),
            provenance: BTreeSet::new(),
        });

        let description = extracted.description.trim();
        if !description.is_empty() && !entry.descriptions.iter().any(|d| d == description) {
            entry.descriptions.push(description.to_string());
        }
        entry.provenance.insert(chunk_id.to_string());
    }

    /// Relationships are held until `finish`: an endpoint may be extracted
    /// from a later chunk than the relationship that names it.
    pub fn add_relationships(&mut self, extracted: Vec<ExtractedRelationship>) {
        self.pending.extend(extracted);
    }

    /// Resolve pending relationships and produce the merged graph.
    /// Unresolvable or invalid relationships are dropped with a warning;
    /// the rest of the batch goes through.
    pub fn finish(self) -> DocumentGraph {
        let GraphBuilder { entities, pending } = self;

        let mut triples: HashMap<(CanonicalKey, CanonicalKey, String), Triple> = HashMap::new();
        for relationship in pending {
            match resolve(&entities, &relationship) {
                Ok(triple) => {
                    let id = (
                        triple.source.clone(),
                        triple.target.clone(),
                        triple.description.clone(),
                    );
                    triples
                        .entry(id)
                        .and_modify(|existing| {
                            existing.strength = existing.strength.max(triple.strength)
                        })
                        .or_insert(triple);
                }
                Err(error) => {
                    warn!(
                        source = %relationship.source,
                        target = %relationship.target,
                        %error,
                        "dropping relationship"
                    );
                }
            }
        }

        let mut entities: Vec<Entity> = entities.into_values().collect();
        entities.sort_by(|a, b| a.key.cmp(&b.key));

        let mut triples: Vec<Triple> = triples.into_values().collect();
        triples.sort_by(|a, b| {
            (&a.source, &a.target, &a.description).cmp(&(&b.source, &b.target, &b.description))
        });

        DocumentGraph { entities, triples }
    }
}

fn resolve(
    entities: &HashMap<CanonicalKey, Entity>,
    relationship: &ExtractedRelationship,
) -> Result<Triple, BuildError> {
    let source = find_key(entities, &relationship.source)
        .ok_or_else(|| BuildError::DanglingReference(relationship.source.clone()))?;
    let target = find_key(entities, &relationship.target)
        .ok_or_else(|| BuildError::DanglingReference(relationship.target.clone()))?;
    Triple::new(
        source,
        target,
        relationship.description.clone(),
        relationship.strength,
    )
}

/// Relationship endpoints carry a name but no type; when one name exists
/// under several types, the lowest-ordered type wins for determinism.
fn find_key(entities: &HashMap<CanonicalKey, Entity>, name: &str) -> Option<CanonicalKey> {
    let canonical = canonical_name(name);
    entities
        .keys()
        .filter(|key| key.name == canonical)
        .min()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityType;

    fn entity(name: &str, entity_type: EntityType, description: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type,
            description: description.to_string(),
        }
    }

    fn relationship(source: &str, target: &str, strength: f64) -> ExtractedRelationship {
        ExtractedRelationship {
            source: source.to_string(),
            target: target.to_string(),
            description: "related to".to_string(),
            strength,
        }
    }

    #[test]
    fn merges_entities_with_same_canonical_identity() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![entity("Martin Smith", EntityType::Person, "the chair")],
        );
        builder.add_entities(
            "chunk-2",
            vec![entity("martin  smith", EntityType::Person, "a person")],
        );

        let graph = builder.finish();
        assert_eq!(graph.entities.len(), 1);

        let merged = &graph.entities[0];
        assert_eq!(merged.key.name, "MARTIN SMITH");
        assert_eq!(merged.display_name, "Martin Smith");
        assert_eq!(merged.descriptions, vec!["the chair", "a person"]);
        assert_eq!(merged.provenance.len(), 2);
    }

    #[test]
    fn duplicate_descriptions_are_not_repeated() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![entity("Graph Theory", EntityType::Concept, "a field")],
        );
        builder.add_entities(
            "chunk-2",
            vec![entity("Graph Theory", EntityType::Concept, "a field")],
        );

        let graph = builder.finish();
        assert_eq!(graph.entities[0].descriptions, vec!["a field"]);
    }

    #[test]
    fn same_name_different_type_stays_separate() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![
                entity("Apple", EntityType::Organization, "the company"),
                entity("Apple", EntityType::Concept, "the fruit"),
            ],
        );

        let graph = builder.finish();
        assert_eq!(graph.entities.len(), 2);
    }

    #[test]
    fn dangling_relationship_is_dropped_not_fatal() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![entity("Martin Smith", EntityType::Person, "")],
        );
        builder.add_relationships(vec![
            relationship("Martin Smith", "Nonexistent Corp", 5.0),
        ]);

        let graph = builder.finish();
        assert_eq!(graph.entities.len(), 1);
        assert!(graph.triples.is_empty());
    }

    #[test]
    fn out_of_range_strength_is_dropped() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![
                entity("A", EntityType::Concept, ""),
                entity("B", EntityType::Concept, ""),
            ],
        );
        builder.add_relationships(vec![
            relationship("A", "B", 0.5),
            relationship("A", "B", 10.5),
        ]);

        assert!(builder.finish().triples.is_empty());
    }

    #[test]
    fn relationship_resolves_across_chunks() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![entity("Martin Smith", EntityType::Person, "the chair")],
        );
        builder.add_relationships(vec![
            relationship("Martin Smith", "Central Institution", 9.0),
        ]);
        // The target only shows up in a later chunk
        builder.add_entities(
            "chunk-2",
            vec![entity("Central Institution", EntityType::Organization, "an institution")],
        );

        let graph = builder.finish();
        assert_eq!(graph.triples.len(), 1);

        let triple = &graph.triples[0];
        assert_eq!(triple.source.name, "MARTIN SMITH");
        assert_eq!(triple.target.name, "CENTRAL INSTITUTION");
        assert_eq!(triple.strength, 9.0);
    }

    #[test]
    fn duplicate_triples_keep_max_strength() {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![
                entity("A", EntityType::Concept, ""),
                entity("B", EntityType::Concept, ""),
            ],
        );
        builder.add_relationships(vec![
            relationship("A", "B", 3.0),
            relationship("A", "B", 7.0),
        ]);

        let graph = builder.finish();
        assert_eq!(graph.triples.len(), 1);
        assert_eq!(graph.triples[0].strength, 7.0);
    }

    #[test]
    fn self_loops_are_kept_when_extracted() {
        let mut builder = GraphBuilder::new();
        builder.add_entities("chunk-1", vec![entity("A", EntityType::Concept, "")]);
        builder.add_relationships(vec![relationship("A", "A", 2.0)]);

        let graph = builder.finish();
        assert_eq!(graph.triples.len(), 1);
        assert_eq!(graph.triples[0].source, graph.triples[0].target);
    }
}
