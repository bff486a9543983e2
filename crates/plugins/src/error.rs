use serde::Serialize;

/// Failure inside a plugin, before or during the upstream call.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unsupported action: {0}")]
    UnknownAction(String),

    #[error("{message}")]
    InvalidInput { message: String },

    #[error("model not allowed: {model}")]
    ModelNotAllowed { model: String },

    #[error("streaming is not permitted for this grant")]
    StreamingNotAllowed,

    #[error("input exceeds the permitted size ({estimate} tokens > {limit})")]
    InputTokensExceeded { estimate: u64, limit: u64 },

    #[error("requested max_tokens {requested} exceeds the permitted cap {limit}")]
    OutputTokensExceeded { requested: u64, limit: u64 },

    /// The provider answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Upstream {
        status: u16,
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream call timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        PluginError::InvalidInput {
            message: message.into(),
        }
    }
}

/// Transport-level outcome of a plugin failure.
#[derive(Debug, Clone, Serialize)]
pub struct MappedError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl MappedError {
    fn new(status: u16, code: &str, message: String, retryable: bool) -> Self {
        MappedError {
            status,
            code: code.to_string(),
            message,
            retryable,
        }
    }
}

/// The standard mapping; plugins override `map_error` only when a provider needs
/// something bespoke.
pub fn default_map_error(err: &PluginError) -> MappedError {
    match err {
        PluginError::UnknownAction(_) => {
            MappedError::new(404, "unknown_resource", err.to_string(), false)
        }
        PluginError::InvalidInput { .. } | PluginError::Json(_) => {
            MappedError::new(422, "invalid_request", err.to_string(), false)
        }
        PluginError::OutputTokensExceeded { .. } => {
            MappedError::new(422, "invalid_request", err.to_string(), false)
        }
        PluginError::ModelNotAllowed { .. } => {
            MappedError::new(403, "model_not_allowed", err.to_string(), false)
        }
        PluginError::StreamingNotAllowed => {
            MappedError::new(403, "streaming_not_allowed", err.to_string(), false)
        }
        PluginError::InputTokensExceeded { .. } => {
            MappedError::new(403, "input_tokens_exceeded", err.to_string(), false)
        }
        PluginError::Upstream {
            status,
            code,
            message,
            retryable,
        } => MappedError::new(*status, code, message.clone(), *retryable),
        PluginError::Transport(_) => {
            MappedError::new(502, "upstream_unreachable", err.to_string(), true)
        }
        PluginError::Timeout => MappedError::new(504, "upstream_timeout", err.to_string(), true),
        PluginError::Cancelled => {
            MappedError::new(499, "request_cancelled", err.to_string(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_preserve_status_and_retryability() {
        let mapped = default_map_error(&PluginError::Upstream {
            status: 429,
            code: "rate_limit_exceeded".into(),
            message: "slow down".into(),
            retryable: true,
        });
        assert_eq!(mapped.status, 429);
        assert_eq!(mapped.code, "rate_limit_exceeded");
        assert!(mapped.retryable);
    }

    #[test]
    fn constraint_failures_are_forbidden() {
        let mapped = default_map_error(&PluginError::ModelNotAllowed {
            model: "gpt-4o".into(),
        });
        assert_eq!(mapped.status, 403);
        assert_eq!(mapped.code, "model_not_allowed");

        let mapped = default_map_error(&PluginError::StreamingNotAllowed);
        assert_eq!(mapped.status, 403);
        assert_eq!(mapped.code, "streaming_not_allowed");
    }

    #[test]
    fn shape_failures_are_unprocessable() {
        let mapped = default_map_error(&PluginError::invalid_input("missing model"));
        assert_eq!(mapped.status, 422);
        assert_eq!(mapped.code, "invalid_request");
    }
}
