//! Chat-completions plugin for OpenAI-compatible providers (Groq, OpenAI, and
//! anything speaking the same dialect).

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value;

use crate::error::PluginError;
use crate::types::{
    ActionSpec, Capabilities, Constraints, CredentialField, CredentialFieldType, Enforcement,
    ExecContext, ExecOptions, Manifest, PluginOutput, Shaped, Usage,
};
use crate::ResourcePlugin;

const CHAT_COMPLETIONS: &str = "chat.completions";

/// Rough pre-flight token estimate: four characters per token, rounded up.
/// The authoritative numbers come from the provider's usage block afterwards.
pub fn estimate_input_tokens(payload: &Value) -> u64 {
    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return 0;
    };
    let mut chars = 0usize;
    for message in messages {
        match message.get("content") {
            Some(Value::String(s)) => chars += s.chars().count(),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        chars += text.chars().count();
                    }
                }
            }
            _ => {}
        }
    }
    (chars as u64).div_ceil(4)
}

/// An OpenAI-compatible `chat.completions` resource.
pub struct LlmChatPlugin {
    manifest: Manifest,
    base_url: String,
    client: reqwest::Client,
}

impl LlmChatPlugin {
    pub fn new(provider: &str, base_url: &str, default_models: Vec<String>) -> Self {
        let manifest = Manifest {
            id: format!("llm:{provider}"),
            resource_type: "llm".into(),
            provider: provider.into(),
            version: "1.0.0".into(),
            name: format!("{provider} chat completions"),
            actions: vec![ActionSpec {
                name: CHAT_COMPLETIONS.into(),
                route: "v1/chat/completions".into(),
            }],
            default_models,
            capabilities: Capabilities {
                enforces_model_allow_list: true,
                enforces_token_caps: true,
                supports_streaming: true,
            },
        };
        LlmChatPlugin {
            manifest,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, config: Option<&Value>) -> String {
        let base = config
            .and_then(|c| c.get("base_url"))
            .and_then(Value::as_str)
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl ResourcePlugin for LlmChatPlugin {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn credential_schema(&self) -> Vec<CredentialField> {
        vec![
            CredentialField {
                name: "api_key".into(),
                field_type: CredentialFieldType::Secret,
                required: true,
                default: None,
            },
            CredentialField {
                name: "base_url".into(),
                field_type: CredentialFieldType::Url,
                required: false,
                default: Some(self.base_url.clone()),
            },
        ]
    }

    fn validate_and_shape(
        &self,
        action: &str,
        input: Value,
        constraints: &Constraints,
    ) -> Result<Shaped, PluginError> {
        if action != CHAT_COMPLETIONS {
            return Err(PluginError::UnknownAction(action.to_string()));
        }
        let Value::Object(mut payload) = input else {
            return Err(PluginError::invalid_input("request body must be a JSON object"));
        };

        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PluginError::invalid_input("missing required field: model"))?;

        if let Some(allowed) = &constraints.allowed_models {
            if !allowed.is_empty() && !allowed.iter().any(|m| m == &model) {
                return Err(PluginError::ModelNotAllowed { model });
            }
        }

        if payload
            .get("messages")
            .and_then(Value::as_array)
            .is_none_or(|m| m.is_empty())
        {
            return Err(PluginError::invalid_input(
                "missing required field: messages",
            ));
        }

        let streaming = payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if streaming && !constraints.streaming_allowed() {
            return Err(PluginError::StreamingNotAllowed);
        }

        if let Some(cap) = constraints.max_output_tokens {
            match payload.get("max_tokens").and_then(Value::as_u64) {
                Some(requested) if requested > cap => {
                    return Err(PluginError::OutputTokensExceeded {
                        requested,
                        limit: cap,
                    });
                }
                Some(_) => {}
                None => {
                    payload.insert("max_tokens".into(), Value::from(cap));
                }
            }
        }

        let payload = Value::Object(payload);
        let input_tokens = estimate_input_tokens(&payload);
        if let Some(limit) = constraints.max_input_tokens {
            if input_tokens > limit {
                return Err(PluginError::InputTokensExceeded {
                    estimate: input_tokens,
                    limit,
                });
            }
        }

        Ok(Shaped {
            payload,
            enforcement: Enforcement {
                model: Some(model),
                input_tokens,
                streaming,
            },
        })
    }

    async fn execute(
        &self,
        action: &str,
        shaped: Shaped,
        ctx: ExecContext<'_>,
        opts: ExecOptions,
    ) -> Result<PluginOutput, PluginError> {
        if action != CHAT_COMPLETIONS {
            return Err(PluginError::UnknownAction(action.to_string()));
        }

        let request = self
            .client
            .post(self.endpoint(ctx.config))
            .bearer_auth(ctx.secret)
            .timeout(opts.timeout)
            .json(&shaped.payload);

        let response = tokio::select! {
            () = opts.cancel.cancelled() => return Err(PluginError::Cancelled),
            result = request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    PluginError::Timeout
                } else {
                    PluginError::Transport(e)
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = parse_upstream_error(&body);
            return Err(PluginError::Upstream {
                status: status.as_u16(),
                code,
                message,
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        if opts.stream && shaped.enforcement.streaming {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("text/event-stream")
                .to_string();
            let stream = response
                .bytes_stream()
                .map_err(PluginError::Transport)
                .boxed();
            return Ok(PluginOutput::Stream {
                stream,
                content_type,
            });
        }

        let body = tokio::select! {
            () = opts.cancel.cancelled() => return Err(PluginError::Cancelled),
            result = response.json::<Value>() => result.map_err(PluginError::Transport)?,
        };
        Ok(PluginOutput::Json {
            body,
            content_type: "application/json".into(),
        })
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        let usage = response.get("usage");
        let field = |name: &str| usage.and_then(|u| u.get(name)).and_then(Value::as_u64);
        Usage {
            input_tokens: field("prompt_tokens"),
            output_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
            model: response
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_owned),
            custom: None,
        }
    }
}

/// Pulls `code` and `message` from an OpenAI-style error body, falling back to
/// the raw text.
fn parse_upstream_error(body: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(error) = value.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| error.get("type").and_then(Value::as_str))
                .unwrap_or("upstream_error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream request failed")
                .to_string();
            return (code, message);
        }
    }
    let mut message = body.trim().to_string();
    message.truncate(256);
    if message.is_empty() {
        message = "upstream request failed".into();
    }
    ("upstream_error".into(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> LlmChatPlugin {
        LlmChatPlugin::new(
            "groq",
            "https://api.groq.com/openai",
            vec!["llama-3.1-8b-instant".into()],
        )
    }

    fn request(model: &str) -> Value {
        serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": "hello there"}],
        })
    }

    fn constraints() -> Constraints {
        Constraints {
            allowed_models: Some(vec!["llama-3.1-8b-instant".into()]),
            max_output_tokens: Some(50),
            ..Default::default()
        }
    }

    #[test]
    fn shapes_valid_request() {
        let shaped = plugin()
            .validate_and_shape(CHAT_COMPLETIONS, request("llama-3.1-8b-instant"), &constraints())
            .unwrap();
        assert_eq!(
            shaped.enforcement.model.as_deref(),
            Some("llama-3.1-8b-instant")
        );
        assert!(!shaped.enforcement.streaming);
        assert!(shaped.enforcement.input_tokens > 0);
        // Cap injected because the request did not set max_tokens.
        assert_eq!(shaped.payload["max_tokens"], 50);
    }

    #[test]
    fn shaping_is_deterministic() {
        let p = plugin();
        let a = p
            .validate_and_shape(CHAT_COMPLETIONS, request("llama-3.1-8b-instant"), &constraints())
            .unwrap();
        let b = p
            .validate_and_shape(CHAT_COMPLETIONS, request("llama-3.1-8b-instant"), &constraints())
            .unwrap();
        assert_eq!(a.payload, b.payload);
        assert_eq!(a.enforcement, b.enforcement);
    }

    #[test]
    fn rejects_disallowed_model() {
        let err = plugin()
            .validate_and_shape(CHAT_COMPLETIONS, request("gpt-4o"), &constraints())
            .unwrap_err();
        assert!(matches!(err, PluginError::ModelNotAllowed { model } if model == "gpt-4o"));
    }

    #[test]
    fn rejects_missing_model() {
        let err = plugin()
            .validate_and_shape(
                CHAT_COMPLETIONS,
                serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
                &Constraints::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_missing_messages() {
        let err = plugin()
            .validate_and_shape(
                CHAT_COMPLETIONS,
                serde_json::json!({"model": "llama-3.1-8b-instant"}),
                &Constraints::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_over_cap_max_tokens() {
        let mut body = request("llama-3.1-8b-instant");
        body["max_tokens"] = Value::from(200);
        let err = plugin()
            .validate_and_shape(CHAT_COMPLETIONS, body, &constraints())
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::OutputTokensExceeded { requested: 200, limit: 50 }
        ));
    }

    #[test]
    fn rejects_stream_when_disallowed() {
        let mut body = request("llama-3.1-8b-instant");
        body["stream"] = Value::from(true);
        let c = Constraints {
            allow_streaming: Some(false),
            ..constraints()
        };
        let err = plugin()
            .validate_and_shape(CHAT_COMPLETIONS, body, &c)
            .unwrap_err();
        assert!(matches!(err, PluginError::StreamingNotAllowed));
    }

    #[test]
    fn rejects_oversized_input() {
        let mut body = request("llama-3.1-8b-instant");
        body["messages"][0]["content"] = Value::from("x".repeat(4000));
        let c = Constraints {
            max_input_tokens: Some(100),
            ..constraints()
        };
        let err = plugin()
            .validate_and_shape(CHAT_COMPLETIONS, body, &c)
            .unwrap_err();
        assert!(matches!(err, PluginError::InputTokensExceeded { .. }));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = plugin()
            .validate_and_shape("embeddings.create", request("m"), &Constraints::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::UnknownAction(_)));
    }

    #[test]
    fn estimates_tokens_from_text_and_parts() {
        let payload = serde_json::json!({
            "messages": [
                {"role": "user", "content": "abcdefgh"},
                {"role": "user", "content": [{"type": "text", "text": "ijkl"}]},
            ]
        });
        assert_eq!(estimate_input_tokens(&payload), 3);
        assert_eq!(estimate_input_tokens(&serde_json::json!({})), 0);
    }

    #[test]
    fn usage_extraction() {
        let body = serde_json::json!({
            "model": "llama-3.1-8b-instant",
            "usage": {"prompt_tokens": 12, "completion_tokens": 34, "total_tokens": 46},
        });
        let usage = plugin().extract_usage(&body);
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(34));
        assert_eq!(usage.total_tokens, Some(46));
        assert_eq!(usage.model.as_deref(), Some("llama-3.1-8b-instant"));
    }

    #[test]
    fn upstream_error_parsing() {
        let (code, message) =
            parse_upstream_error(r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#);
        assert_eq!(code, "invalid_api_key");
        assert_eq!(message, "bad key");

        let (code, message) = parse_upstream_error("gateway exploded");
        assert_eq!(code, "upstream_error");
        assert_eq!(message, "gateway exploded");
    }
}
