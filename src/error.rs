//! Error taxonomy for lifecycle operations.

use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::rules::{IngressRule, describe_rules};

/// Errors raised by the lifecycle managers, the converger and the provider
/// registry.
///
/// Every variant except [`ProvisionError::Provider`] is fatal: re-invoking
/// the operation without changing inputs or provider state produces the same
/// outcome. See [`ProvisionError::is_retryable`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when a required specification field is absent.
    #[error("{resource}: missing required parameter '{parameter}'")]
    MissingParameter {
        /// Resource being provisioned.
        resource: String,
        /// Name of the missing field.
        parameter: String,
    },
    /// Raised when a logical provider name is not registered.
    #[error("unsupported provider '{name}'")]
    UnsupportedProvider {
        /// Logical name passed by the caller, after normalisation.
        name: String,
    },
    /// Raised when a reference matches more than one provider resource.
    #[error("{kind} reference '{reference}' is ambiguous: {matches} matches found")]
    AmbiguousReference {
        /// Kind of resource being referenced.
        kind: String,
        /// Reference value supplied by the caller.
        reference: String,
        /// Number of candidates found.
        matches: usize,
    },
    /// Raised when pre-existing provider state is inconsistent with the
    /// request.
    #[error("conflict on {resource}: {detail}")]
    Conflict {
        /// Resource name or identifier.
        resource: String,
        /// Human-readable description of the conflict.
        detail: String,
    },
    /// Raised when an existing security group carries different rules from
    /// the ones requested.
    #[error(
        "rules of existing security group '{name}' do not match the requested rules; existing: {}, requested: {}",
        describe_rules(.existing),
        describe_rules(.requested)
    )]
    RulesMismatch {
        /// Security group name.
        name: String,
        /// Canonicalised rules found on the provider.
        existing: Vec<IngressRule>,
        /// Resolved rules requested by the caller.
        requested: Vec<IngressRule>,
    },
    /// Raised when a referenced resource cannot be resolved.
    #[error("{kind} '{reference}' not found")]
    NotFound {
        /// Kind of resource being looked up.
        kind: String,
        /// Identifier, name or address used for the lookup.
        reference: String,
    },
    /// Raised when an operation requires a resource state that does not
    /// hold, for example stopping a server that does not exist.
    #[error("cannot {action} {resource}: {reason}")]
    Precondition {
        /// Resource name or identifier.
        resource: String,
        /// Operation being attempted.
        action: String,
        /// Why the operation cannot proceed.
        reason: String,
    },
    /// Raised when a convergence wait exceeds its budget.
    #[error("timeout waiting for {resource_id} to become {target}; last observed state: {last_state}")]
    Timeout {
        /// Provider identifier of the resource being watched.
        resource_id: String,
        /// State the converger was waiting for.
        target: String,
        /// Last state returned by the provider.
        last_state: String,
    },
    /// Raised when a poll policy could never make progress.
    #[error("invalid poll policy: {0}")]
    InvalidPollPolicy(String),
    /// Raised when an ingress rule cannot be constructed.
    #[error("invalid ingress rule: {0}")]
    InvalidRule(String),
    /// Raised when connection configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a stored property has an unexpected shape.
    #[error("runtime property '{key}' is invalid: {message}")]
    Property {
        /// Property key.
        key: String,
        /// Description of the problem.
        message: String,
    },
    /// Wrapper for provider driver failures.
    #[error("provider error: {0}")]
    Provider(#[from] DriverError),
    /// Raised when a provider rejects a deletion. Never retried.
    #[error("failed to delete {resource} {id}: {source}")]
    DeleteFailed {
        /// Kind of resource being deleted.
        resource: String,
        /// Provider identifier.
        id: String,
        /// Underlying driver failure.
        #[source]
        source: Box<DriverError>,
    },
}

impl ProvisionError {
    /// Shorthand for [`ProvisionError::MissingParameter`].
    #[must_use]
    pub fn missing(resource: &str, parameter: &str) -> Self {
        Self::MissingParameter {
            resource: resource.to_owned(),
            parameter: parameter.to_owned(),
        }
    }

    /// Shorthand for [`ProvisionError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &str, reference: &str) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            reference: reference.to_owned(),
        }
    }

    /// Reports whether re-invoking the failed operation may succeed.
    ///
    /// Only transient provider failures qualify. Timeouts are fatal at this
    /// layer: a create that timed out has already provisioned something, and
    /// the caller decides whether adoption makes a retry safe.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(source) => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<ConfigError> for ProvisionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
