//! Capability set implemented by every provider backend.
//!
//! The lifecycle managers only ever talk to a [`ProviderDriver`]. Drivers
//! report raw provider state; they never cache it and never decide whether
//! a resource should be reused or recreated.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::{IngressRule, ObservedRule};

/// Provider API statuses that can never succeed on retry.
pub const NON_RECOVERABLE_STATUSES: [u16; 5] = [400, 401, 403, 404, 409];

/// Errors raised by provider drivers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when the provider API rejects a request.
    #[error("provider API returned status {status}: {message}")]
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body or SDK message.
        message: String,
    },
    /// Raised when the request never reached the provider.
    #[error("transport failure: {message}")]
    Transport {
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when a provider response cannot be interpreted.
    #[error("unexpected provider response: {message}")]
    Decode {
        /// Parser error message.
        message: String,
    },
    /// Raised when a backend family cannot express an operation.
    #[error("{family} does not support {operation}")]
    Unsupported {
        /// Backend family name.
        family: String,
        /// Operation that was requested.
        operation: String,
    },
    /// Raised when a resource is in a state that forbids the action.
    #[error("{resource} {id} in state {state} does not allow {action}")]
    InvalidState {
        /// Kind of resource.
        resource: String,
        /// Provider identifier.
        id: String,
        /// State reported by the provider.
        state: String,
        /// Action that was refused.
        action: String,
    },
    /// Raised when a driver cannot be built from the connection settings.
    #[error("invalid driver configuration: {0}")]
    Config(String),
}

impl DriverError {
    /// Shorthand for [`DriverError::Unsupported`].
    #[must_use]
    pub fn unsupported(family: &str, operation: &str) -> Self {
        Self::Unsupported {
            family: family.to_owned(),
            operation: operation.to_owned(),
        }
    }

    /// Reports whether the failure is transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api { status, .. } => !matches!(*status, 400 | 401 | 403 | 404 | 409),
            Self::Decode { .. }
            | Self::Unsupported { .. }
            | Self::InvalidState { .. }
            | Self::Config(_) => false,
        }
    }
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Observed lifecycle state of a server.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Being created or booting.
    Pending,
    /// Powered on.
    Running,
    /// Powered off but still provisioned.
    Stopped,
    /// Deleted, or no longer visible to the provider.
    Terminated,
    /// Any provider state without a lifecycle mapping.
    Unknown,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of a server as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSnapshot {
    /// Provider identifier.
    pub id: String,
    /// Server name.
    pub name: String,
    /// Mapped lifecycle state.
    pub state: ServerState,
    /// Private addresses, in provider order.
    pub private_ips: Vec<String>,
    /// Public addresses, in provider order.
    pub public_ips: Vec<String>,
}

/// How a server size is selected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SizeSelector {
    /// Provider size or flavour identifier.
    Named(String),
    /// Memory in megabytes; the driver picks the matching flavour.
    Ram(u32),
}

impl fmt::Display for SizeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Ram(megabytes) => write!(f, "{megabytes} MB RAM"),
        }
    }
}

/// Fully resolved parameters for creating a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateServerRequest {
    /// Final (prefixed) server name.
    pub name: String,
    /// Provider image identifier.
    pub image_id: String,
    /// Provider size identifier.
    pub size_id: String,
    /// Number of virtual CPUs, when the provider lets callers choose.
    pub vcpus: Option<u32>,
    /// Network to attach, when the provider requires one.
    pub network: Option<String>,
    /// Security group names to apply.
    pub security_groups: Vec<String>,
    /// SSH key pair name.
    pub key_name: Option<String>,
}

/// Floating IP as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FloatingIp {
    /// Provider identifier; equals the address on providers without one.
    pub id: String,
    /// The address itself.
    pub address: String,
    /// Server currently using the address.
    pub server_id: Option<String>,
}

/// Security group as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityGroupSnapshot {
    /// Provider identifier.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Description; providers without descriptions report `None`.
    pub description: Option<String>,
    /// Ingress rules currently on the group.
    pub rules: Vec<ObservedRule>,
}

/// Raw operations a backend must provide.
pub trait ProviderDriver: Send + Sync {
    /// Backend family name used in diagnostics.
    fn family(&self) -> &str;

    /// Fetches a server by identifier. Returns `None` once it is gone.
    fn get_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, Option<ServerSnapshot>>;

    /// Fetches a server by exact name.
    fn find_server_by_name<'a>(&'a self, name: &'a str)
    -> DriverFuture<'a, Option<ServerSnapshot>>;

    /// Resolves an image name to a provider identifier.
    fn find_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, Option<String>>;

    /// Resolves a size selector to a provider identifier.
    fn find_size<'a>(&'a self, selector: &'a SizeSelector) -> DriverFuture<'a, Option<String>>;

    /// Creates a server and returns its first snapshot.
    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> DriverFuture<'a, ServerSnapshot>;

    /// Powers a stopped server on.
    fn start_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()>;

    /// Powers a running server off.
    fn stop_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()>;

    /// Requests server deletion. Completion is observed by polling.
    fn delete_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()>;

    /// Allocates a new floating IP.
    fn allocate_floating_ip(&self) -> DriverFuture<'_, FloatingIp>;

    /// Looks up a floating IP by address.
    fn find_floating_ip<'a>(&'a self, address: &'a str) -> DriverFuture<'a, Option<FloatingIp>>;

    /// Releases a floating IP back to the provider.
    fn release_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()>;

    /// Routes a floating IP to a server.
    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        ip: &'a FloatingIp,
    ) -> DriverFuture<'a, ()>;

    /// Detaches a floating IP from whatever server uses it.
    fn disassociate_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()>;

    /// Lists security groups whose name matches exactly.
    fn list_security_groups<'a>(
        &'a self,
        name: &'a str,
    ) -> DriverFuture<'a, Vec<SecurityGroupSnapshot>>;

    /// Creates an empty security group.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: Option<&'a str>,
    ) -> DriverFuture<'a, SecurityGroupSnapshot>;

    /// Adds an ingress rule to a group.
    fn create_ingress_rule<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> DriverFuture<'a, ()>;

    /// Deletes a security group.
    fn delete_security_group<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()>;
}
