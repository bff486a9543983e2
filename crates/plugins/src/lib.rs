//! Resource plugin contract, registry, and the built-in providers.
//!
//! A plugin owns everything provider-specific about one resource: parsing and
//! shaping inbound payloads, applying the constraints the generic policy engine
//! treats opaquely, performing the outbound call (JSON or streaming), pulling
//! usage out of responses, and mapping provider failures onto transport-level
//! outcomes.

use async_trait::async_trait;

/// Email delivery plugin (Resend-compatible API).
pub mod email;
pub mod error;
/// LLM chat-completions plugin (OpenAI-compatible APIs).
pub mod llm;
pub mod registry;
pub mod types;

pub use error::{MappedError, PluginError, default_map_error};
pub use registry::{PluginRegistry, RegistryError};
pub use types::{
    ActionSpec, Capabilities, Constraints, CredentialField, CredentialFieldType, Enforcement,
    ExecContext, ExecOptions, Manifest, PluginOutput, Shaped, Usage,
};

/// Contract every resource plugin fulfills.
///
/// `validate_and_shape` must be pure: the same `(action, input, constraints)`
/// always yields the same outcome. `execute` receives the decrypted upstream
/// secret and a cancellation handle tied to the inbound request.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    fn manifest(&self) -> &Manifest;

    /// Declarative credential fields the operator supplies when registering the
    /// upstream secret. Drives the admin surface only.
    fn credential_schema(&self) -> Vec<CredentialField>;

    /// Parses provider-specific input, applies plugin-level constraints, and
    /// returns a payload ready to forward plus the enforcement facts the policy
    /// engine consumes.
    fn validate_and_shape(
        &self,
        action: &str,
        input: serde_json::Value,
        constraints: &Constraints,
    ) -> Result<Shaped, PluginError>;

    /// Performs the outbound call.
    async fn execute(
        &self,
        action: &str,
        shaped: Shaped,
        ctx: ExecContext<'_>,
        opts: ExecOptions,
    ) -> Result<PluginOutput, PluginError>;

    /// Pulls usage numbers out of a completed JSON response body.
    fn extract_usage(&self, response: &serde_json::Value) -> Usage;

    /// Converts a failure into a transport-level outcome.
    fn map_error(&self, err: &PluginError) -> MappedError {
        default_map_error(err)
    }
}
