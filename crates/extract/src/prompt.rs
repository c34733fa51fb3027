/// Prompt for the entity half of the extraction protocol
pub fn entity_prompt(text: &str) -> String {
    format!(
        r#"Given a text document, identify all entities of the listed types from the text.

For each identified entity, extract:
- name: Name of the entity, capitalized
- type: One of the following types: [PERSON, ORGANIZATION, GEO, EVENT, CONCEPT]
- description: Comprehensive description of the entity's attributes and activities

Format each entity as a JSON object:
{{"name": "<entity name>", "type": "<type>", "description": "<entity description>"}}

Text:
{text}

Return only a JSON array of entities, nothing else."#
    )
}

/// Prompt for the relationship half of the extraction protocol
pub fn relationship_prompt(text: &str) -> String {
    format!(
        r#"Given a text document, identify all relationships between entities in the text.

For each relationship, extract:
- source: Name of the source entity (capitalized)
- target: Name of the target entity (capitalized)
- relationship: Explanation of how they are related
- relationship_strength: Numeric score from 1 to 10 indicating strength

Format each relationship as a JSON object:
{{"source": "<source>", "target": "<target>", "relationship": "<description>", "relationship_strength": <strength>}}

Text:
{text}

Return only a JSON array of relationships, nothing else."#
    )
}
