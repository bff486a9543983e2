//! Transactional email plugin for Resend-compatible APIs.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PluginError;
use crate::types::{
    ActionSpec, Capabilities, Constraints, CredentialField, CredentialFieldType, Enforcement,
    ExecContext, ExecOptions, Manifest, PluginOutput, Shaped, Usage,
};
use crate::ResourcePlugin;

const EMAILS_SEND: &str = "emails.send";

/// Sends transactional email through a Resend-style `/emails` endpoint.
pub struct EmailSendPlugin {
    manifest: Manifest,
    base_url: String,
    client: reqwest::Client,
}

impl EmailSendPlugin {
    pub fn new(provider: &str, base_url: &str) -> Self {
        let manifest = Manifest {
            id: format!("email:{provider}"),
            resource_type: "email".into(),
            provider: provider.into(),
            version: "1.0.0".into(),
            name: format!("{provider} transactional email"),
            actions: vec![ActionSpec {
                name: EMAILS_SEND.into(),
                route: "emails".into(),
            }],
            default_models: Vec::new(),
            capabilities: Capabilities::default(),
        };
        EmailSendPlugin {
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
        format!("{base}/emails")
    }
}

fn recipients(payload: &serde_json::Map<String, Value>) -> Vec<String> {
    match payload.get("to") {
        Some(Value::String(addr)) => vec![addr.clone()],
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl ResourcePlugin for EmailSendPlugin {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn credential_schema(&self) -> Vec<CredentialField> {
        vec![CredentialField {
            name: "api_key".into(),
            field_type: CredentialFieldType::Secret,
            required: true,
            default: None,
        }]
    }

    fn validate_and_shape(
        &self,
        action: &str,
        input: Value,
        constraints: &Constraints,
    ) -> Result<Shaped, PluginError> {
        if action != EMAILS_SEND {
            return Err(PluginError::UnknownAction(action.to_string()));
        }
        let Value::Object(payload) = input else {
            return Err(PluginError::invalid_input("request body must be a JSON object"));
        };

        let sender = payload
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::invalid_input("missing required field: from"))?;
        let to = recipients(&payload);
        if to.is_empty() {
            return Err(PluginError::invalid_input("missing required field: to"));
        }
        if payload.get("subject").and_then(Value::as_str).is_none() {
            return Err(PluginError::invalid_input("missing required field: subject"));
        }
        if payload.get("html").is_none() && payload.get("text").is_none() {
            return Err(PluginError::invalid_input("either html or text is required"));
        }

        if let Some(max) = constraints.extra.get("max_recipients").and_then(Value::as_u64) {
            if to.len() as u64 > max {
                return Err(PluginError::invalid_input(format!(
                    "too many recipients: {} (max {max})",
                    to.len()
                )));
            }
        }
        if let Some(allowed) = constraints
            .extra
            .get("allowed_senders")
            .and_then(Value::as_array)
        {
            let permitted = allowed
                .iter()
                .filter_map(Value::as_str)
                .any(|a| a == sender);
            if !permitted {
                return Err(PluginError::invalid_input(format!(
                    "sender not allowed: {sender}"
                )));
            }
        }

        Ok(Shaped {
            payload: Value::Object(payload),
            enforcement: Enforcement::default(),
        })
    }

    async fn execute(
        &self,
        action: &str,
        shaped: Shaped,
        ctx: ExecContext<'_>,
        opts: ExecOptions,
    ) -> Result<PluginOutput, PluginError> {
        if action != EMAILS_SEND {
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
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("email delivery failed")
                .to_string();
            return Err(PluginError::Upstream {
                status: status.as_u16(),
                code: body
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream_error")
                    .to_string(),
                message,
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        Ok(PluginOutput::Json {
            body,
            content_type: "application/json".into(),
        })
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        Usage {
            custom: response
                .get("id")
                .and_then(Value::as_str)
                .map(|id| serde_json::json!({ "email_id": id })),
            ..Default::default()
        }
    }
}
