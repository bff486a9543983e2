use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;

/// Default wall-clock budget for one upstream call.
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Static description of a plugin.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Must equal `<resource_type>:<provider>`; the registry rejects mismatches.
    pub id: String,
    pub resource_type: String,
    pub provider: String,
    pub version: String,
    /// Human-readable name.
    pub name: String,
    pub actions: Vec<ActionSpec>,
    pub default_models: Vec<String>,
    pub capabilities: Capabilities,
}

impl Manifest {
    /// Resolves an action name from the trailing URL path of a resource request.
    pub fn action_for_route(&self, route: &str) -> Option<&str> {
        let route = route.trim_matches('/');
        self.actions
            .iter()
            .find(|a| a.route == route)
            .map(|a| a.name.as_str())
    }

    pub fn supports_action(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name == name)
    }
}

/// One invocable operation and the URL suffix that reaches it.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    /// Stable action name, e.g. `chat.completions`.
    pub name: String,
    /// URL path under `/r/<type>/<provider>/`, e.g. `v1/chat/completions`.
    pub route: String,
}

/// What the plugin can enforce on its own inputs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Capabilities {
    pub enforces_model_allow_list: bool,
    pub enforces_token_caps: bool,
    pub supports_streaming: bool,
}

/// A field the operator fills in when registering an upstream credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CredentialFieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialFieldType {
    Secret,
    String,
    Url,
}

/// Plugin-facing view of a permission's constraint object.
///
/// Aliases accept the camelCase spelling older clients send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    #[serde(alias = "allowedModels", skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,
    #[serde(alias = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(alias = "maxInputTokens", skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(alias = "allowStreaming", skip_serializing_if = "Option::is_none")]
    pub allow_streaming: Option<bool>,
    /// Anything else is plugin-specific.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Constraints {
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn streaming_allowed(&self) -> bool {
        self.allow_streaming.unwrap_or(true)
    }
}

/// A validated payload ready to forward, plus the facts policy needs.
#[derive(Debug, Clone)]
pub struct Shaped {
    pub payload: serde_json::Value,
    pub enforcement: Enforcement,
}

/// Enforcement facts extracted while shaping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enforcement {
    pub model: Option<String>,
    /// Pre-flight input token estimate; authoritative numbers come from usage.
    pub input_tokens: u64,
    pub streaming: bool,
}

/// Usage extracted from a completed response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// Execution context handed to `execute`: the decrypted upstream secret and the
/// resource's non-secret config.
pub struct ExecContext<'a> {
    pub secret: &'a str,
    pub config: Option<&'a serde_json::Value>,
}

/// Per-call options.
pub struct ExecOptions {
    /// Cancelled when the inbound request goes away.
    pub cancel: CancellationToken,
    /// Caller asked for a streamed response.
    pub stream: bool,
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            cancel: CancellationToken::new(),
            stream: false,
            timeout: DEFAULT_EXECUTE_TIMEOUT,
        }
    }
}

/// Outcome of `execute`: a completed JSON body, or a byte stream the gateway
/// forwards without buffering.
pub enum PluginOutput {
    Json {
        body: serde_json::Value,
        content_type: String,
    },
    Stream {
        stream: BoxStream<'static, Result<Bytes, PluginError>>,
        content_type: String,
    },
}
