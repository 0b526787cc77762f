//! Provider credential resolution.
//!
//! Each configured credential is resolved from one of three sources, in
//! priority order:
//!
//! 1. **Direct value** - for quick local testing (`"value": "sk-..."`)
//! 2. **File reference** - for Docker secrets (`"file": "/run/secrets/openai"`)
//! 3. **Env var reference** - for production (`"envVar": "OPENAI_API_KEY_2"`)
//!
//! The engine asks a [`CredentialSource`] for every usable credential of a
//! provider; the count decides how many worker lanes run in parallel.

use std::collections::HashMap;
use std::fs;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret resolved to an empty value")]
    Empty,
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find one credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl CredentialRef {
    pub fn env(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn direct(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// At least one non-empty source is configured.
    pub fn has_source(&self) -> bool {
        [&self.value, &self.file, &self.env_var]
            .iter()
            .any(|s| s.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Resolves the credential using the first configured source.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = self.file.as_deref().filter(|p| !p.is_empty()) {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                path: expanded.clone(),
                source: e,
            })?;
            return non_empty(content.trim());
        }

        if let Some(name) = self.env_var.as_deref().filter(|n| !n.is_empty()) {
            return match std::env::var(name) {
                // Env vars may carry trailing newlines.
                Ok(value) => non_empty(value.trim()),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

fn non_empty(value: &str) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty);
    }
    Ok(SecretString::from(value.to_string()))
}

/// Expands `~` and `~/path` to the current user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Supplies the credentials usable in parallel for a provider.
pub trait CredentialSource: Send + Sync {
    /// Zero, one or many credentials. An empty list still runs one lane
    /// without a credential.
    fn parallel_credentials(&self, provider: &str) -> Vec<SecretString>;
}

/// Credentials resolved from configuration on every request, so rotated
/// files and env vars are picked up by the next job.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCredentials {
    providers: HashMap<String, Vec<CredentialRef>>,
}

impl ConfiguredCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>, refs: Vec<CredentialRef>) -> Self {
        self.providers.insert(provider.into(), refs);
        self
    }
}

impl CredentialSource for ConfiguredCredentials {
    fn parallel_credentials(&self, provider: &str) -> Vec<SecretString> {
        let Some(refs) = self.providers.get(provider) else {
            log::debug!("No credentials configured for provider '{}'", provider);
            return Vec::new();
        };

        refs.iter()
            .enumerate()
            .filter_map(|(idx, cred)| match cred.resolve() {
                Ok(secret) => Some(secret),
                Err(e) => {
                    log::warn!(
                        "Skipping credential #{} for provider '{}': {}",
                        idx,
                        provider,
                        e
                    );
                    None
                }
            })
            .collect()
    }
}
