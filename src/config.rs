//! Connection configuration loading via `ortho-config`.
//!
//! Loading is an explicit step performed by the caller. The lifecycle
//! managers only ever see the merged [`ConnectionConfig`]; they never read
//! files or the environment themselves.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Provider family used when no provider name is configured.
pub const DEFAULT_PROVIDER_NAME: &str = "scaleway";

/// Provider connection settings derived from configuration files,
/// environment variables (`CONNECTION_*`), and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CONNECTION")]
pub struct ConnectionConfig {
    /// Logical provider name, for example `scaleway` or `scaleway_nl_ams_1`.
    #[ortho_config(default = DEFAULT_PROVIDER_NAME.to_owned())]
    pub cloud_provider_name: String,
    /// Access key identifier. Not every family needs one.
    pub access_id: Option<String>,
    /// Secret used to authenticate against the provider API.
    #[ortho_config(default = String::new())]
    pub secret_key: String,
    /// API endpoint override, mainly for self-hosted or test endpoints.
    pub host: Option<String>,
    /// Project identifier used to scope created resources.
    pub project_id: Option<String>,
    /// Region or zone used when the provider name carries none.
    pub region: Option<String>,
    /// Prefix prepended to every resource name.
    pub resources_prefix: Option<String>,
}

/// Per-node connection settings that take precedence over the loaded
/// configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ConnectionOverrides {
    /// Replaces [`ConnectionConfig::cloud_provider_name`].
    pub cloud_provider_name: Option<String>,
    /// Replaces [`ConnectionConfig::access_id`].
    pub access_id: Option<String>,
    /// Replaces [`ConnectionConfig::secret_key`].
    pub secret_key: Option<String>,
    /// Replaces [`ConnectionConfig::host`].
    pub host: Option<String>,
    /// Replaces [`ConnectionConfig::project_id`].
    pub project_id: Option<String>,
    /// Replaces [`ConnectionConfig::region`].
    pub region: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    config_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        config_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            config_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to the connection configuration",
            self.description, self.env_var, self.config_key
        ))
    }
}

const PROVIDER_NAME: FieldMetadata = FieldMetadata::new(
    "cloud provider name",
    "CONNECTION_CLOUD_PROVIDER_NAME",
    "cloud_provider_name",
);
const SECRET_KEY: FieldMetadata =
    FieldMetadata::new("provider secret key", "CONNECTION_SECRET_KEY", "secret_key");
const PROJECT_ID: FieldMetadata =
    FieldMetadata::new("provider project ID", "CONNECTION_PROJECT_ID", "project_id");

impl ConnectionConfig {
    /// Creates a configuration for `cloud_provider_name` authenticated with
    /// `secret_key`. Remaining fields are unset.
    #[must_use]
    pub fn new(cloud_provider_name: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            cloud_provider_name: cloud_provider_name.into(),
            access_id: None,
            secret_key: secret_key.into(),
            host: None,
            project_id: None,
            region: None,
            resources_prefix: None,
        }
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("stratus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies node-level overrides on top of the loaded values.
    #[must_use]
    pub fn with_overrides(self, overrides: ConnectionOverrides) -> Self {
        Self {
            cloud_provider_name: overrides
                .cloud_provider_name
                .unwrap_or(self.cloud_provider_name),
            access_id: overrides.access_id.or(self.access_id),
            secret_key: overrides.secret_key.unwrap_or(self.secret_key),
            host: overrides.host.or(self.host),
            project_id: overrides.project_id.or(self.project_id),
            region: overrides.region.or(self.region),
            resources_prefix: self.resources_prefix,
        }
    }

    /// Returns the project identifier, failing with guidance when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no project is configured.
    pub fn require_project_id(&self) -> Result<&str, ConfigError> {
        match self.project_id.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(PROJECT_ID.missing()),
        }
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.cloud_provider_name, &PROVIDER_NAME)?;
        Self::require_field(&self.secret_key, &SECRET_KEY)?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
