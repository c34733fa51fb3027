use async_trait::async_trait;
use neo4rs::{Graph, Query};
use std::collections::HashMap;

use extract::{Entity, Triple};

use crate::store::{GraphFilter, GraphMatch, GraphStore, StoreError};

/// Neo4j-backed graph store. All writes are Cypher MERGEs keyed by the
/// canonical entity key, so task retries cannot create duplicates.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { graph })
    }

    /// Initialize schema: create indexes
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let query = Query::new(
            "CREATE INDEX entity_key_index IF NOT EXISTS FOR (e:Entity) ON (e.key)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let query = Query::new(
            "CREATE INDEX entity_type_index IF NOT EXISTS FOR (e:Entity) ON (e.type)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    /// Cheap connectivity check for health reporting
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Hop expansion: one query per hop over the current frontier
    async fn expand(
        &self,
        seeds: &[String],
        hops: u32,
        matches: &mut HashMap<(String, String), GraphMatch>,
    ) -> Result<(), StoreError> {
        let mut frontier: Vec<String> = seeds.to_vec();

        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }

            let query = Query::new(
                r#"
                MATCH (e:Entity)-[r:RELATED]-(neighbor:Entity)
                WHERE e.key IN $keys
                UNWIND neighbor.doc_keys AS doc_key
                RETURN neighbor.key AS key, doc_key AS doc_key, r.strength AS score
                "#
                .to_string(),
            )
            .param("keys", frontier.clone());

            let mut result = self
                .graph
                .execute(query)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

            let mut next_frontier = Vec::new();
            while let Some(row) = result
                .next()
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?
            {
                let key: String = row
                    .get("key")
                    .map_err(|e| StoreError::Malformed(e.to_string()))?;
                let doc_key: String = row
                    .get("doc_key")
                    .map_err(|e| StoreError::Malformed(e.to_string()))?;
                let score: f64 = row.get("score").unwrap_or(1.0);

                let entry = matches
                    .entry((doc_key.clone(), key.clone()))
                    .or_insert_with(|| GraphMatch {
                        doc_key,
                        entity_key: key.clone(),
                        score,
                    });
                entry.score = entry.score.max(score);
                next_frontier.push(key);
            }

            frontier = next_frontier;
        }

        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_entity(&self, doc_key: &str, entity: &Entity) -> Result<(), StoreError> {
        let chunk_ids: Vec<String> = entity.provenance.iter().cloned().collect();

        let query = Query::new(
            r#"
            MERGE (e:Entity {key: $key})
            ON CREATE SET e.doc_keys = $doc_keys, e.chunk_ids = $chunk_ids
            ON MATCH SET
                e.doc_keys = [k IN e.doc_keys WHERE NOT k IN $doc_keys] + $doc_keys,
                e.chunk_ids = [c IN e.chunk_ids WHERE NOT c IN $chunk_ids] + $chunk_ids
            SET e.name = $name,
                e.type = $type,
                e.descriptions = $descriptions
            "#
            .to_string(),
        )
        .param("key", entity.key.to_string())
        .param("doc_keys", vec![doc_key.to_string()])
        .param("chunk_ids", chunk_ids)
        .param("name", entity.display_name.clone())
        .param("type", entity.key.entity_type.to_string())
        .param("descriptions", entity.descriptions.clone());

        self.graph
            .run(query)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn upsert_relationship(&self, triple: &Triple) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MATCH (source:Entity {key: $source_key})
            MATCH (target:Entity {key: $target_key})
            MERGE (source)-[r:RELATED {description: $description}]->(target)
            SET r.strength = $strength
            "#
            .to_string(),
        )
        .param("source_key", triple.source.to_string())
        .param("target_key", triple.target.to_string())
        .param("description", triple.description.clone())
        .param("strength", triple.strength);

        self.graph
            .run(query)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn query(&self, filter: &GraphFilter) -> Result<Vec<GraphMatch>, StoreError> {
        // Seed match with optional predicates, built up clause by clause
        let mut cypher = String::from("MATCH (e:Entity)\n");
        if filter.entity_type.is_some() {
            cypher.push_str("WHERE e.type = $type\n");
        }
        cypher.push_str("OPTIONAL MATCH (e)-[r:RELATED]-()\n");
        cypher.push_str("WITH e, max(r.strength) AS strength\n");
        if filter.min_strength.is_some() {
            cypher.push_str("WHERE strength IS NOT NULL AND strength >= $min_strength\n");
        }
        cypher.push_str(
            "UNWIND e.doc_keys AS doc_key\n\
             RETURN e.key AS key, doc_key AS doc_key, coalesce(strength, 1.0) AS score\n\
             LIMIT $limit\n",
        );

        let mut query = Query::new(cypher).param("limit", filter.limit as i64);
        if let Some(entity_type) = filter.entity_type {
            query = query.param("type", entity_type.to_string());
        }
        if let Some(min_strength) = filter.min_strength {
            query = query.param("min_strength", min_strength);
        }

        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut matches: HashMap<(String, String), GraphMatch> = HashMap::new();
        let mut seeds = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            let key: String = row
                .get("key")
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            let doc_key: String = row
                .get("doc_key")
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            let score: f64 = row.get("score").unwrap_or(1.0);

            seeds.push(key.clone());
            matches.insert(
                (doc_key.clone(), key.clone()),
                GraphMatch {
                    doc_key,
                    entity_key: key,
                    score,
                },
            );
        }

        if filter.depth > 1 {
            self.expand(&seeds, filter.depth - 1, &mut matches).await?;
        }

        let mut out: Vec<GraphMatch> = matches.into_values().collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_key.cmp(&b.doc_key))
        });
        out.truncate(filter.limit);
        Ok(out)
    }
}
