//! Idempotent lifecycle reconciliation for cloud resources.
//!
//! The crate decides whether a requested server, floating IP or security
//! group already exists and should be adopted, drives create and delete
//! operations to convergence by bounded polling, and reconciles requested
//! security-group rules against what a provider reports. Every provider is
//! reached through the [`ProviderDriver`] capability set, selected by
//! logical name from a [`ProviderRegistry`]; a Scaleway driver is built in.
//!
//! Operations persist their progress in a [`RuntimeProperties`] bag owned by
//! the calling orchestration engine, so an interrupted invocation can be
//! re-run safely.

pub mod config;
pub mod converge;
pub mod driver;
pub mod error;
pub mod floating_ip;
pub mod naming;
pub mod properties;
pub mod provider;
pub mod rules;
pub mod scaleway;
pub mod security_group;
pub mod server;
pub mod session;
pub mod test_support;

pub use config::{ConfigError, ConnectionConfig, ConnectionOverrides};
pub use converge::{PollPolicy, await_state};
pub use driver::{DriverError, ProviderDriver, ServerSnapshot, ServerState};
pub use error::ProvisionError;
pub use floating_ip::{FloatingIpManager, FloatingIpRecord, FloatingIpSpec, ReleaseOutcome};
pub use naming::{ResourceNamer, TransformedName};
pub use properties::RuntimeProperties;
pub use provider::{
    DriverFactory, ProviderContext, ProviderQuirks, ProviderRegistry, ResolvedProvider,
};
pub use rules::{IngressRule, ObservedRule, RemoteRef, rules_equivalent};
pub use scaleway::{ScalewayDriver, ScalewayFactory};
pub use security_group::{
    ConflictDetail, PeerDirectory, ReconciliationResult, RuleSpec, SecurityGroupReconciler,
    SecurityGroupRequest, SecurityGroupSpec,
};
pub use server::{ServerHandle, ServerManager, ServerObservation, ServerSpec};
pub use session::ProviderSession;
