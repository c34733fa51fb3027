/// Failures surfaced by the model-service client.
///
/// `RateLimited` and `UpstreamUnavailable` are transient and retried up to
/// the budget. `InvalidResponse` retries only on the embedding path; on the
/// extraction path it signals a contract problem and is terminal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("model service rate limit exceeded")]
    RateLimited,

    #[error("model service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Item-level failures while building the document graph. The offending
/// record is dropped with a warning and the batch continues.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("relationship references unknown entity: {0}")]
    DanglingReference(String),
}
