use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::Row;
use sqlx::mysql::{MySqlPool, MySqlRow};
use std::collections::HashMap;

use crate::store::{DocumentMetadata, FieldFilter, RelationalStore, StoreError, StructuredRow};

/// Metadata fields structured filters may touch. Everything else is
/// rejected rather than interpolated into SQL.
const FILTERABLE_FIELDS: &[&str] = &["title", "language", "status"];

/// MySQL-backed relational store holding document display metadata
pub struct MySqlRelationalStore {
    pool: MySqlPool,
}

impl MySqlRelationalStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPool::connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_key     VARCHAR(64) PRIMARY KEY,
                title       TEXT NOT NULL,
                authors     TEXT NOT NULL,
                summary     TEXT NOT NULL,
                categories  TEXT NOT NULL,
                language    VARCHAR(16) NOT NULL,
                status      VARCHAR(16) NOT NULL,
                created_at  DATETIME(6) NOT NULL,
                updated_at  DATETIME(6) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Cheap connectivity check for health reporting
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn row_to_metadata(row: &MySqlRow) -> Result<(String, DocumentMetadata), StoreError> {
        let doc_key: String = row
            .try_get("doc_key")
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let authors: String = row
            .try_get("authors")
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let categories: String = row
            .try_get("categories")
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let created_at: NaiveDateTime = row
            .try_get("created_at")
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let updated_at: NaiveDateTime = row
            .try_get("updated_at")
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        let metadata = DocumentMetadata {
            title: row
                .try_get("title")
                .map_err(|e| StoreError::Malformed(e.to_string()))?,
            authors: serde_json::from_str(&authors).unwrap_or_default(),
            summary: row
                .try_get("summary")
                .map_err(|e| StoreError::Malformed(e.to_string()))?,
            categories: serde_json::from_str(&categories).unwrap_or_default(),
            language: row
                .try_get("language")
                .map_err(|e| StoreError::Malformed(e.to_string()))?,
            status: row
                .try_get("status")
                .map_err(|e| StoreError::Malformed(e.to_string()))?,
            created_at: Some(created_at.and_utc()),
            updated_at: Some(updated_at.and_utc()),
        };
        Ok((doc_key, metadata))
    }

    fn filter_value(value: &serde_json::Value) -> String {
        match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        }
    }
}

#[async_trait]
impl RelationalStore for MySqlRelationalStore {
    async fn upsert_metadata(
        &self,
        doc_key: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), StoreError> {
        let authors = serde_json::to_string(&metadata.authors)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let categories = serde_json::to_string(&metadata.categories)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let created_at = metadata
            .created_at
            .unwrap_or_else(Utc::now)
            .naive_utc();
        let updated_at = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO documents
                (doc_key, title, authors, summary, categories, language, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                title = VALUES(title),
                authors = VALUES(authors),
                summary = VALUES(summary),
                categories = VALUES(categories),
                language = VALUES(language),
                status = VALUES(status),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(doc_key)
        .bind(&metadata.title)
        .bind(authors)
        .bind(&metadata.summary)
        .bind(categories)
        .bind(&metadata.language)
        .bind(&metadata.status)
        .bind(created_at)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        filters: &[FieldFilter],
        limit: usize,
    ) -> Result<Vec<StructuredRow>, StoreError> {
        let mut sql = String::from(
            "SELECT doc_key, title, authors, summary, categories, language, status, \
             created_at, updated_at FROM documents",
        );

        let mut values = Vec::new();
        for (i, filter) in filters.iter().enumerate() {
            if !FILTERABLE_FIELDS.contains(&filter.field.as_str()) {
                return Err(StoreError::Query(format!(
                    "unsupported filter field: {}",
                    filter.field
                )));
            }
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&filter.field);
            sql.push_str(" = ?");
            values.push(Self::filter_value(&filter.value));
        }
        sql.push_str(" LIMIT ?");

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Self::row_to_metadata(row).map(|(doc_key, metadata)| StructuredRow {
                    doc_key,
                    metadata,
                })
            })
            .collect()
    }

    async fn fetch_metadata(
        &self,
        doc_keys: &[String],
    ) -> Result<HashMap<String, DocumentMetadata>, StoreError> {
        if doc_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; doc_keys.len()].join(", ");
        let sql = format!(
            "SELECT doc_key, title, authors, summary, categories, language, status, \
             created_at, updated_at FROM documents WHERE doc_key IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for key in doc_keys {
            query = query.bind(key);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter().map(|row| Self::row_to_metadata(row)).collect()
    }
}
