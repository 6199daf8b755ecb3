//! Logical provider names mapped onto backend driver families.
//!
//! A family is one [`DriverFactory`]. Regional variants of a family are
//! extra logical names that resolve to the same factory with the region
//! threaded through, so `scaleway_nl_ams_1` and `scaleway` share a driver
//! and differ only in the zone they connect to.
//!
//! Scaleway is the only family registered by
//! [`ProviderRegistry::with_builtin`], and it sizes servers by name with
//! attachable floating IPs. RAM sizing, mandatory networks and
//! non-attachable floating IPs exist for families that work that way, such
//! as vCloud-style providers; those families are added with
//! [`ProviderRegistry::register_family`], and the in-crate
//! [`FakeFactory`](crate::test_support::FakeFactory) exercises them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::driver::{DriverError, ProviderDriver};
use crate::error::ProvisionError;
use crate::scaleway::ScalewayFactory;

/// How a family selects server sizes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeSelection {
    /// By size or flavour name (`size_name`).
    ByName,
    /// By memory in megabytes (`ram`).
    ByRam,
}

/// How a family routes floating IPs to servers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloatingIpAttach {
    /// The provider associates an address with a server directly.
    Associate,
    /// The family cannot attach floating IPs.
    Unsupported,
}

/// Behavioural differences between provider families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProviderQuirks {
    /// How server sizes are selected.
    pub size_selection: SizeSelection,
    /// Whether server creation needs a management network.
    pub requires_network: bool,
    /// Whether server creation needs an SSH key pair.
    pub requires_key_pair: bool,
    /// Floating IP attach support.
    pub floating_ip_attach: FloatingIpAttach,
    /// Whether ingress rules may reference other security groups.
    pub remote_group_rules: bool,
}

/// A provider resource referenced by name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NamedResource {
    /// Resource name as known to the provider.
    pub name: String,
}

/// Provider-wide resources that individual operations fall back to.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ProviderContext {
    /// Security group every agent server joins.
    #[serde(default)]
    pub agents_security_group: Option<NamedResource>,
    /// Key pair installed on agent servers without an explicit key.
    #[serde(default)]
    pub agents_keypair: Option<NamedResource>,
}

#[derive(Deserialize)]
struct ContextMetadata {
    #[serde(default)]
    resources: ProviderContext,
}

impl ProviderContext {
    /// Reads the context from deployment metadata of the form
    /// `{"resources": {"agents_security_group": {"name": ".."}, ..}}`.
    ///
    /// Missing or null metadata yields an empty context.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the metadata has the wrong
    /// shape.
    pub fn from_metadata(metadata: &Value) -> Result<Self, ProvisionError> {
        if metadata.is_null() {
            return Ok(Self::default());
        }
        ContextMetadata::deserialize(metadata)
            .map(|parsed| parsed.resources)
            .map_err(|err| ProvisionError::Config(format!("invalid provider context: {err}")))
    }

    /// Name of the default agents security group.
    #[must_use]
    pub fn agents_security_group_name(&self) -> Option<&str> {
        self.agents_security_group
            .as_ref()
            .map(|resource| resource.name.as_str())
    }

    /// Name of the default agents key pair.
    #[must_use]
    pub fn agents_keypair_name(&self) -> Option<&str> {
        self.agents_keypair
            .as_ref()
            .map(|resource| resource.name.as_str())
    }
}

/// Builds drivers for one backend family.
pub trait DriverFactory: Send + Sync {
    /// Family name, which is also its base logical name.
    fn family(&self) -> &str;

    /// Connects to the provider. `region` is `None` when neither the
    /// logical name nor the configuration picks one.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when the settings are unusable.
    fn connect(
        &self,
        region: Option<&str>,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ProviderDriver>, DriverError>;

    /// Behavioural differences of this family.
    fn quirks(&self) -> ProviderQuirks;

    /// Builds the provider context from deployment metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the metadata is malformed.
    fn provider_context(&self, metadata: &Value) -> Result<ProviderContext, ProvisionError> {
        ProviderContext::from_metadata(metadata)
    }
}

#[derive(Clone)]
struct Registration {
    factory: Arc<dyn DriverFactory>,
    region: Option<String>,
}

/// A logical name resolved to its family and region.
#[derive(Clone)]
pub struct ResolvedProvider {
    logical_name: String,
    factory: Arc<dyn DriverFactory>,
    region: Option<String>,
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("logical_name", &self.logical_name)
            .field("family", &self.factory.family())
            .field("region", &self.region)
            .finish()
    }
}

impl ResolvedProvider {
    /// Normalised logical name that was resolved.
    #[must_use]
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    /// Family serving the name.
    #[must_use]
    pub fn family(&self) -> &str {
        self.factory.family()
    }

    /// Region fixed by the logical name, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Family quirks.
    #[must_use]
    pub fn quirks(&self) -> ProviderQuirks {
        self.factory.quirks()
    }

    /// Connects a driver. The region bound to the logical name wins over
    /// the configured one.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Provider`] when the factory rejects the
    /// configuration.
    pub fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ProviderDriver>, ProvisionError> {
        let region = self.region.as_deref().or(config.region.as_deref());
        Ok(self.factory.connect(region, config)?)
    }

    /// Builds the provider context through the family factory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the metadata is malformed.
    pub fn provider_context(&self, metadata: &Value) -> Result<ProviderContext, ProvisionError> {
        self.factory.provider_context(metadata)
    }
}

/// Lookup table from logical provider names to driver families.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, Registration>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// Canonical form of a logical provider name: trimmed, with `-` replaced
/// by `_`.
#[must_use]
pub fn normalise_provider_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in family.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let scaleway = ScalewayFactory::new();
        let variants = ScalewayFactory::regional_variants();
        registry.register_family(Arc::new(scaleway), variants);
        registry
    }

    /// Registers a family under its own name plus the given
    /// `(logical name, region)` variants. Later registrations replace
    /// earlier ones with the same name.
    pub fn register_family<I, N, R>(&mut self, factory: Arc<dyn DriverFactory>, variants: I)
    where
        I: IntoIterator<Item = (N, R)>,
        N: AsRef<str>,
        R: Into<String>,
    {
        let family = normalise_provider_name(factory.family());
        for (name, region) in variants {
            self.entries.insert(
                normalise_provider_name(name.as_ref()),
                Registration {
                    factory: Arc::clone(&factory),
                    region: Some(region.into()),
                },
            );
        }
        self.entries.insert(
            family,
            Registration {
                factory,
                region: None,
            },
        );
    }

    /// Resolves a logical provider name.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedProvider`] for unknown names.
    pub fn resolve(&self, logical_name: &str) -> Result<ResolvedProvider, ProvisionError> {
        let key = normalise_provider_name(logical_name);
        let Some(registration) = self.entries.get(&key) else {
            return Err(ProvisionError::UnsupportedProvider { name: key });
        };
        Ok(ResolvedProvider {
            logical_name: key,
            factory: Arc::clone(&registration.factory),
            region: registration.region.clone(),
        })
    }

    /// Registered logical names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
