#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} rejected the credentials (status {status})")]
    Unauthorized { provider: &'static str, status: u16 },

    #[error("{provider} embedding request failed (status {status})")]
    Status { provider: &'static str, status: u16 },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected}-dimensional embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl EmbedError {
    /// Credential failures are not worth retrying item by item.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Network-level failures: connection refused, timeouts, non-success statuses.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Unauthorized { .. } | Self::Status { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_auth_and_transport() {
        let err = EmbedError::Unauthorized {
            provider: "openai",
            status: 401,
        };
        assert!(err.is_auth());
        assert!(err.is_transport());
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn dimension_is_neither_auth_nor_transport() {
        let err = EmbedError::Dimension {
            expected: 4,
            actual: 3,
        };
        assert!(!err.is_auth());
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "expected 4-dimensional embedding, got 3");
    }
}
