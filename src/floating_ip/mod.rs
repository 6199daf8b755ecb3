//! Floating IP acquisition, release and routing.
//!
//! Addresses supplied by the caller are recorded but never allocated or
//! released here. Only addresses this system allocated carry the
//! `enable_deletion` flag, and only those are returned to the provider.

use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{DriverError, FloatingIp, ProviderDriver};
use crate::error::ProvisionError;
use crate::properties::{
    ENABLE_DELETION, EXTERNAL_ID, FLOATING_IP_ADDRESS, IP_ADDRESS, RuntimeProperties,
};
use crate::provider::{FloatingIpAttach, ProviderQuirks};
use crate::server::ServerHandle;

const KIND: &str = "floating IP";

/// Requested floating IP configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FloatingIpSpec {
    /// Shorthand for [`FloatingIpSpec::ip_address`].
    pub ip: Option<String>,
    /// Existing address to use instead of allocating one.
    pub ip_address: Option<String>,
}

impl FloatingIpSpec {
    /// Address supplied by the caller. `ip_address` wins when both are set.
    #[must_use]
    pub fn requested_address(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .or(self.ip.as_deref())
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

/// Floating IP owned by a resource instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FloatingIpRecord {
    /// The address.
    pub address: String,
    /// Provider identifier, known only for allocated addresses.
    pub external_id: Option<String>,
    /// Whether this system allocated the address and may release it.
    pub acquired_by_this_system: bool,
}

impl FloatingIpRecord {
    /// Reads a record back from the property bag.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Property`] when a stored value has the wrong
    /// type.
    pub fn from_properties(props: &RuntimeProperties) -> Result<Option<Self>, ProvisionError> {
        let stored = match props.get_str(FLOATING_IP_ADDRESS)? {
            Some(address) => Some(address),
            None => props.get_str(IP_ADDRESS)?,
        };
        let Some(address) = stored else {
            return Ok(None);
        };
        Ok(Some(Self {
            address: address.to_owned(),
            external_id: props.get_str(EXTERNAL_ID)?.map(str::to_owned),
            acquired_by_this_system: props.get_flag(ENABLE_DELETION)?,
        }))
    }

    /// Writes the record to the property bag.
    pub fn store(&self, props: &mut RuntimeProperties) {
        props.set(IP_ADDRESS, self.address.as_str());
        props.set(FLOATING_IP_ADDRESS, self.address.as_str());
        props.set(ENABLE_DELETION, self.acquired_by_this_system);
        if let Some(id) = &self.external_id {
            props.set(EXTERNAL_ID, id.as_str());
        }
    }

    fn clear(props: &mut RuntimeProperties) {
        for key in [IP_ADDRESS, FLOATING_IP_ADDRESS, ENABLE_DELETION, EXTERNAL_ID] {
            props.remove(key);
        }
    }
}

/// Result of a release request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReleaseOutcome {
    /// The address was returned to the provider.
    Released,
    /// The address was not allocated by this system and was left alone.
    Skipped,
}

/// Manages floating IPs on one provider.
#[derive(Clone, Copy)]
pub struct FloatingIpManager<'a> {
    driver: &'a dyn ProviderDriver,
    quirks: ProviderQuirks,
}

impl<'a> FloatingIpManager<'a> {
    /// Creates a manager.
    #[must_use]
    pub const fn new(driver: &'a dyn ProviderDriver, quirks: ProviderQuirks) -> Self {
        Self { driver, quirks }
    }

    /// Records a caller-supplied address or allocates a new one.
    ///
    /// An address already recorded by an earlier invocation is returned
    /// without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Provider`] when allocation fails and
    /// [`ProvisionError::Property`] when the bag holds malformed values.
    pub async fn create(
        &self,
        spec: &FloatingIpSpec,
        props: &mut RuntimeProperties,
    ) -> Result<FloatingIpRecord, ProvisionError> {
        if let Some(existing) = FloatingIpRecord::from_properties(props)? {
            debug!(address = %existing.address, "using already allocated floating IP");
            return Ok(existing);
        }

        let record = if let Some(address) = spec.requested_address() {
            info!(address, "recording caller-supplied floating IP");
            FloatingIpRecord {
                address: address.to_owned(),
                external_id: None,
                acquired_by_this_system: false,
            }
        } else {
            let allocated = self.driver.allocate_floating_ip().await?;
            info!(address = %allocated.address, ip_id = %allocated.id, "allocated floating IP");
            FloatingIpRecord {
                address: allocated.address,
                external_id: Some(allocated.id),
                acquired_by_this_system: true,
            }
        };
        record.store(props);
        Ok(record)
    }

    /// Releases the recorded address if this system allocated it, then
    /// clears the recorded keys.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] when the provider no longer
    /// knows the address and [`ProvisionError::Provider`] when the release
    /// fails.
    pub async fn release(
        &self,
        props: &mut RuntimeProperties,
    ) -> Result<ReleaseOutcome, ProvisionError> {
        let Some(record) = FloatingIpRecord::from_properties(props)? else {
            debug!("no floating IP recorded; nothing to release");
            return Ok(ReleaseOutcome::Skipped);
        };
        if !record.acquired_by_this_system {
            info!(address = %record.address, "not deleting floating IP that was not allocated here");
            FloatingIpRecord::clear(props);
            return Ok(ReleaseOutcome::Skipped);
        }

        let ip = self.lookup(&record.address).await?;
        info!(address = %ip.address, ip_id = %ip.id, "releasing floating IP");
        self.driver.release_floating_ip(&ip).await?;
        FloatingIpRecord::clear(props);
        Ok(ReleaseOutcome::Released)
    }

    /// Routes the recorded address to `server`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for unknown addresses and
    /// [`ProvisionError::Provider`] when the family cannot attach addresses
    /// or the provider rejects the request.
    pub async fn attach(
        &self,
        server: &ServerHandle,
        record: &FloatingIpRecord,
    ) -> Result<(), ProvisionError> {
        self.ensure_attach_supported("attach")?;
        let ip = self.lookup(&record.address).await?;
        info!(server = %server.name, address = %ip.address, "connecting floating IP");
        self.driver.associate_floating_ip(&server.id, &ip).await?;
        Ok(())
    }

    /// Detaches the recorded address from whatever server uses it.
    ///
    /// # Errors
    ///
    /// Same as [`FloatingIpManager::attach`].
    pub async fn detach(&self, record: &FloatingIpRecord) -> Result<(), ProvisionError> {
        self.ensure_attach_supported("detach")?;
        let ip = self.lookup(&record.address).await?;
        info!(address = %ip.address, "disconnecting floating IP");
        self.driver.disassociate_floating_ip(&ip).await?;
        Ok(())
    }

    fn ensure_attach_supported(&self, action: &str) -> Result<(), ProvisionError> {
        match self.quirks.floating_ip_attach {
            FloatingIpAttach::Associate => Ok(()),
            FloatingIpAttach::Unsupported => Err(DriverError::unsupported(
                self.driver.family(),
                &format!("floating IP {action}"),
            )
            .into()),
        }
    }

    async fn lookup(&self, address: &str) -> Result<FloatingIp, ProvisionError> {
        self.driver
            .find_floating_ip(address)
            .await?
            .ok_or_else(|| ProvisionError::not_found(KIND, address))
    }
}
