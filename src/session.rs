//! Per-invocation wiring of configuration, driver, context and naming.
//!
//! A [`ProviderSession`] is built once per engine operation and hands out
//! managers that borrow from it. Nothing in it outlives the operation.

use std::fmt;

use serde_json::Value;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::converge::PollPolicy;
use crate::driver::ProviderDriver;
use crate::error::ProvisionError;
use crate::floating_ip::FloatingIpManager;
use crate::naming::ResourceNamer;
use crate::provider::{ProviderContext, ProviderRegistry, ResolvedProvider};
use crate::security_group::SecurityGroupReconciler;
use crate::server::ServerManager;

/// Connected provider plus everything the managers need.
pub struct ProviderSession {
    provider: ResolvedProvider,
    driver: Box<dyn ProviderDriver>,
    context: ProviderContext,
    namer: ResourceNamer,
    policy: PollPolicy,
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("provider", &self.provider)
            .field("context", &self.context)
            .field("namer", &self.namer)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ProviderSession {
    /// Resolves the configured provider, connects a driver and reads the
    /// provider context from `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] for incomplete configuration or
    /// malformed metadata, [`ProvisionError::UnsupportedProvider`] for
    /// unknown provider names, and [`ProvisionError::Provider`] when the
    /// driver cannot be built.
    pub fn open(
        registry: &ProviderRegistry,
        config: &ConnectionConfig,
        metadata: &Value,
    ) -> Result<Self, ProvisionError> {
        config.validate()?;
        let provider = registry.resolve(&config.cloud_provider_name)?;
        let driver = provider.connect(config)?;
        let context = provider.provider_context(metadata)?;
        let namer = ResourceNamer::new(config.resources_prefix.clone());
        info!(
            provider = provider.logical_name(),
            family = provider.family(),
            region = provider.region().or(config.region.as_deref()).unwrap_or("default"),
            "opened provider session"
        );
        Ok(Self {
            provider,
            driver,
            context,
            namer,
            policy: PollPolicy::server_default(),
        })
    }

    /// Replaces the poll policy handed to server managers.
    #[must_use]
    pub fn with_poll_policy(self, policy: PollPolicy) -> Self {
        Self { policy, ..self }
    }

    /// The resolved provider.
    #[must_use]
    pub const fn provider(&self) -> &ResolvedProvider {
        &self.provider
    }

    /// The connected driver.
    #[must_use]
    pub fn driver(&self) -> &dyn ProviderDriver {
        self.driver.as_ref()
    }

    /// Provider-wide fallback resources.
    #[must_use]
    pub const fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Deployment name prefixing.
    #[must_use]
    pub const fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    /// Server lifecycle manager bound to this session.
    #[must_use]
    pub fn servers(&self) -> ServerManager<'_> {
        ServerManager::new(
            self.driver(),
            self.provider.quirks(),
            &self.context,
            &self.namer,
        )
        .with_poll_policy(self.policy)
    }

    /// Floating IP manager bound to this session.
    #[must_use]
    pub fn floating_ips(&self) -> FloatingIpManager<'_> {
        FloatingIpManager::new(self.driver(), self.provider.quirks())
    }

    /// Security group reconciler bound to this session.
    #[must_use]
    pub fn security_groups(&self) -> SecurityGroupReconciler<'_> {
        SecurityGroupReconciler::new(self.driver(), self.provider.quirks(), &self.namer)
    }
}
