//! Scaleway Instances backend.
//!
//! Image lookup and power actions go through `scaleway-rs`; everything the
//! SDK does not cover (server reads and creation, flexible IPs, security
//! groups) is sent as raw JSON over a shared `reqwest` client.

mod error;
mod http;
mod image;
mod ip;
mod security_group;
mod server;
mod types;

use scaleway_rs::ScalewayApi;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::driver::{
    CreateServerRequest, DriverError, DriverFuture, FloatingIp, ProviderDriver,
    SecurityGroupSnapshot, ServerSnapshot, SizeSelector,
};
use crate::provider::{DriverFactory, FloatingIpAttach, ProviderQuirks, SizeSelection};
use crate::rules::IngressRule;
use types::Zone;

/// Family name and base logical name of the backend.
pub const FAMILY: &str = "scaleway";
/// Zone used when neither the provider name nor the configuration sets one.
pub const DEFAULT_ZONE: &str = "fr-par-1";
/// Zones exposed as `scaleway_<zone>` logical names.
pub const ZONES: [&str; 9] = [
    "fr-par-1", "fr-par-2", "fr-par-3", "nl-ams-1", "nl-ams-2", "nl-ams-3", "pl-waw-1",
    "pl-waw-2", "pl-waw-3",
];
/// Public Instances API endpoint.
pub const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
/// CPU architecture requested when resolving images.
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Driver for one Scaleway zone.
#[derive(Clone)]
pub struct ScalewayDriver {
    api: ScalewayApi,
    secret_key: String,
    project_id: String,
    zone: Zone,
    base_url: String,
    architecture: String,
}

impl ScalewayDriver {
    /// Builds a driver for `zone` from validated connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when the secret key or project ID is
    /// missing.
    pub fn new(zone: &str, config: &ConnectionConfig) -> Result<Self, DriverError> {
        config.validate()?;
        let project_id = config.require_project_id()?.to_owned();
        let base_url = config
            .host
            .as_deref()
            .unwrap_or(SCALEWAY_INSTANCE_API_BASE)
            .trim_end_matches('/')
            .to_owned();
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            secret_key: config.secret_key.clone(),
            project_id,
            zone: Zone::from(zone),
            base_url,
            architecture: DEFAULT_ARCHITECTURE.to_owned(),
        })
    }

    /// Zone the driver operates in.
    #[must_use]
    pub const fn zone(&self) -> &str {
        self.zone.as_str()
    }
}

impl ProviderDriver for ScalewayDriver {
    fn family(&self) -> &str {
        FAMILY
    }

    fn get_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, Option<ServerSnapshot>> {
        Box::pin(self.fetch_server(id))
    }

    fn find_server_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> DriverFuture<'a, Option<ServerSnapshot>> {
        Box::pin(self.lookup_server_by_name(name))
    }

    fn find_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, Option<String>> {
        Box::pin(self.resolve_image_id(name))
    }

    fn find_size<'a>(&'a self, selector: &'a SizeSelector) -> DriverFuture<'a, Option<String>> {
        Box::pin(self.resolve_commercial_type(selector))
    }

    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> DriverFuture<'a, ServerSnapshot> {
        Box::pin(async move {
            if let Some(key_name) = &request.key_name {
                debug!(
                    key = %key_name,
                    "Scaleway injects project SSH keys; ignoring requested key pair"
                );
            }
            self.create_and_power_on(request).await
        })
    }

    fn start_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.server_action(id, "poweron"))
    }

    fn stop_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.server_action(id, "poweroff"))
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.remove_server(id))
    }

    fn allocate_floating_ip(&self) -> DriverFuture<'_, FloatingIp> {
        Box::pin(self.create_ip())
    }

    fn find_floating_ip<'a>(&'a self, address: &'a str) -> DriverFuture<'a, Option<FloatingIp>> {
        Box::pin(self.lookup_ip(address))
    }

    fn release_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()> {
        Box::pin(self.delete_ip(ip))
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        ip: &'a FloatingIp,
    ) -> DriverFuture<'a, ()> {
        Box::pin(self.route_ip(ip, Some(server_id)))
    }

    fn disassociate_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()> {
        Box::pin(self.route_ip(ip, None))
    }

    fn list_security_groups<'a>(
        &'a self,
        name: &'a str,
    ) -> DriverFuture<'a, Vec<SecurityGroupSnapshot>> {
        Box::pin(self.security_groups_named(name))
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: Option<&'a str>,
    ) -> DriverFuture<'a, SecurityGroupSnapshot> {
        Box::pin(self.create_group(name, description))
    }

    fn create_ingress_rule<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> DriverFuture<'a, ()> {
        Box::pin(self.create_rule(group_id, rule))
    }

    fn delete_security_group<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.delete_group(id))
    }
}

/// Factory registered under [`FAMILY`] and every `scaleway_<zone>` name.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalewayFactory;

impl ScalewayFactory {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Logical names for every zone, paired with the zone they select.
    #[must_use]
    pub fn regional_variants() -> Vec<(String, String)> {
        ZONES
            .iter()
            .map(|zone| (format!("{FAMILY}_{}", zone.replace('-', "_")), (*zone).to_owned()))
            .collect()
    }
}

impl DriverFactory for ScalewayFactory {
    fn family(&self) -> &str {
        FAMILY
    }

    fn connect(
        &self,
        region: Option<&str>,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ProviderDriver>, DriverError> {
        let zone = region.unwrap_or(DEFAULT_ZONE);
        Ok(Box::new(ScalewayDriver::new(zone, config)?))
    }

    fn quirks(&self) -> ProviderQuirks {
        ProviderQuirks {
            size_selection: SizeSelection::ByName,
            requires_network: false,
            requires_key_pair: false,
            floating_ip_attach: FloatingIpAttach::Associate,
            remote_group_rules: false,
        }
    }
}

#[cfg(test)]
mod tests;
