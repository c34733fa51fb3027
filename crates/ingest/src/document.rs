use serde::{Deserialize, Serialize};

/// Document processing lifecycle. Transitions only move forward:
/// `Pending -> Processing -> Done | Failed`, with `Failed -> Processing`
/// allowed so persistence can be retried against the stores that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, thiserror::Error)]
#[error("illegal document status transition: {from:?} -> {to:?}")]
pub struct StatusError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source: String,
    pub language: String,
    pub status: DocumentStatus,
    pub chunk_ids: Vec<String>,
    /// Pipeline stage that failed, set while status is `Failed`
    pub failed_stage: Option<String>,
    /// Stores that failed during persistence, kept for targeted retry
    pub failed_stores: Vec<String>,
}

impl Document {
    pub fn new(doc_id: String, source: String, language: String) -> Self {
        Self {
            doc_id,
            source,
            language,
            status: DocumentStatus::Pending,
            chunk_ids: Vec::new(),
            failed_stage: None,
            failed_stores: Vec::new(),
        }
    }

    /// Move the document forward through its lifecycle. Rejects any
    /// backward transition (`Done -> Pending` and the like).
    pub fn advance(&mut self, to: DocumentStatus) -> Result<(), StatusError> {
        use DocumentStatus::*;

        let allowed = matches!(
            (self.status, to),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Done)
                | (Processing, Failed)
                | (Failed, Processing)
        );
        if !allowed {
            return Err(StatusError {
                from: self.status,
                to,
            });
        }

        if to != DocumentStatus::Failed {
            self.failed_stage = None;
            self.failed_stores.clear();
        }
        self.status = to;
        Ok(())
    }

    /// Mark the document failed, recording which stage and stores broke
    pub fn mark_failed(
        &mut self,
        stage: &str,
        failed_stores: Vec<String>,
    ) -> Result<(), StatusError> {
        self.advance(DocumentStatus::Failed)?;
        self.failed_stage = Some(stage.to_string());
        self.failed_stores = failed_stores;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("d1".into(), "memo.txt".into(), "en".into())
    }

    #[test]
    fn forward_transitions_succeed() {
        let mut d = doc();
        d.advance(DocumentStatus::Processing).unwrap();
        d.advance(DocumentStatus::Done).unwrap();
        assert_eq!(d.status, DocumentStatus::Done);
    }

    #[test]
    fn done_never_returns_to_pending() {
        let mut d = doc();
        d.advance(DocumentStatus::Processing).unwrap();
        d.advance(DocumentStatus::Done).unwrap();
        assert!(d.advance(DocumentStatus::Pending).is_err());
        assert!(d.advance(DocumentStatus::Processing).is_err());
    }

    #[test]
    fn failed_allows_retry() {
        let mut d = doc();
        d.advance(DocumentStatus::Processing).unwrap();
        d.mark_failed("persist", vec!["graph".into()]).unwrap();
        assert_eq!(d.failed_stage.as_deref(), Some("persist"));

        d.advance(DocumentStatus::Processing).unwrap();
        assert!(d.failed_stores.is_empty());
        d.advance(DocumentStatus::Done).unwrap();
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut d = doc();
        assert!(d.advance(DocumentStatus::Done).is_err());
    }
}
