//! Gateway configuration.
//!
//! Loaded from TOML, with `env:VAR_NAME` indirection for secret values and a
//! few flag overrides applied by the binary.
//!
//! ```toml
//! bind_address = "127.0.0.1:8787"
//! public_url = "https://gw.example.com"
//! db_path = "/var/lib/gatehouse/db"
//! master_secret = "env:GATEHOUSE_MASTER_SECRET"
//!
//! [[llm_providers]]
//! provider = "groq"
//! base_url = "https://api.groq.com/openai"
//! default_models = ["llama-3.1-8b-instant"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gatehouse_plugins::email::EmailSendPlugin;
use gatehouse_plugins::llm::LlmChatPlugin;
use gatehouse_plugins::{PluginRegistry, RegistryError};
use gatehouse_vault::MASTER_SECRET_ENV;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the HTTP server binds to.
    pub bind_address: SocketAddr,

    /// Absolute URL apps reach the gateway at; used in pairing strings and
    /// approval URLs.
    pub public_url: String,

    pub db_path: PathBuf,

    /// Master secret for the vault, or `env:VAR_NAME`. Falls back to the
    /// `GATEHOUSE_MASTER_SECRET` environment variable when unset.
    pub master_secret: Option<String>,

    /// Wall-clock budget for one upstream call, seconds.
    pub upstream_timeout_secs: u64,

    pub cleanup_interval_secs: u64,

    pub llm_providers: Vec<LlmProviderConfig>,

    pub email_providers: Vec<EmailProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub provider: String,
    pub base_url: String,
    #[serde(default)]
    pub default_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    pub provider: String,
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8787)),
            public_url: "http://127.0.0.1:8787".into(),
            db_path: PathBuf::from("gatehouse-db"),
            master_secret: None,
            upstream_timeout_secs: 30,
            cleanup_interval_secs: 60,
            llm_providers: vec![
                LlmProviderConfig {
                    provider: "groq".into(),
                    base_url: "https://api.groq.com/openai".into(),
                    default_models: vec!["llama-3.1-8b-instant".into()],
                },
                LlmProviderConfig {
                    provider: "openai".into(),
                    base_url: "https://api.openai.com".into(),
                    default_models: vec!["gpt-4o-mini".into()],
                },
            ],
            email_providers: vec![EmailProviderConfig {
                provider: "resend".into(),
                base_url: "https://api.resend.com".into(),
            }],
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(e.to_string()))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.public_url)
            .map_err(|_| ConfigError::Invalid("public_url must be an absolute URL".into()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "public_url must be http or https".into(),
            ));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream_timeout_secs must be positive".into(),
            ));
        }
        for provider in &self.llm_providers {
            if provider.provider.is_empty() || provider.provider.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "invalid llm provider name: {:?}",
                    provider.provider
                )));
            }
        }
        for provider in &self.email_providers {
            if provider.provider.is_empty() || provider.provider.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "invalid email provider name: {:?}",
                    provider.provider
                )));
            }
        }
        Ok(())
    }

    /// `public_url` without a trailing slash, as pairing strings carry it.
    pub fn public_url_trimmed(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Resolves the master secret, expanding `env:VAR_NAME` references and
    /// falling back to the well-known environment variable.
    pub fn resolve_master_secret(&self) -> Option<String> {
        match &self.master_secret {
            Some(value) => {
                if let Some(var) = value.strip_prefix("env:") {
                    std::env::var(var).ok()
                } else {
                    Some(value.clone())
                }
            }
            None => std::env::var(MASTER_SECRET_ENV).ok(),
        }
    }

    /// Builds the plugin registry from the configured providers.
    pub fn build_registry(&self) -> Result<PluginRegistry, RegistryError> {
        let mut registry = PluginRegistry::new();
        for provider in &self.llm_providers {
            registry.register(Arc::new(LlmChatPlugin::new(
                &provider.provider,
                &provider.base_url,
                provider.default_models.clone(),
            )))?;
        }
        for provider in &self.email_providers {
            registry.register(Arc::new(EmailSendPlugin::new(
                &provider.provider,
                &provider.base_url,
            )))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_build_a_registry() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.get_by_parts("llm", "groq").is_some());
        assert!(registry.get_by_parts("email", "resend").is_some());
    }

    #[test]
    fn toml_round_trip() {
        let toml_str = r#"
bind_address = "0.0.0.0:9000"
public_url = "https://gw.example.com/"
db_path = "/tmp/ghdb"

[[llm_providers]]
provider = "groq"
base_url = "https://api.groq.com/openai"
default_models = ["llama-3.1-8b-instant"]
"#;
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.public_url_trimmed(), "https://gw.example.com");
        assert_eq!(config.llm_providers.len(), 1);
    }

    #[test]
    fn rejects_bad_public_url() {
        let config = GatewayConfig {
            public_url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_colon_in_provider_name() {
        let mut config = GatewayConfig::default();
        config.llm_providers[0].provider = "llm:groq".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_master_secret_resolution() {
        let config = GatewayConfig {
            master_secret: Some("env:GATEHOUSE_TEST_MASTER_XYZ".into()),
            ..Default::default()
        };
        assert!(config.resolve_master_secret().is_none());

        // SAFETY: test-only, single variable
        unsafe { std::env::set_var("GATEHOUSE_TEST_MASTER_XYZ", "resolved") };
        assert_eq!(config.resolve_master_secret().as_deref(), Some("resolved"));
        unsafe { std::env::remove_var("GATEHOUSE_TEST_MASTER_XYZ") };

        let literal = GatewayConfig {
            master_secret: Some("literal-secret".into()),
            ..Default::default()
        };
        assert_eq!(
            literal.resolve_master_secret().as_deref(),
            Some("literal-secret")
        );
    }
}
