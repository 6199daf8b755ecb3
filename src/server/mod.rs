//! Server create-or-adopt, stop, delete and state observation.
//!
//! Every operation re-fetches the server: a handle returned by one call is
//! never trusted by the next. The stored `server_id` is the primary lookup
//! key; the prefixed instance identifier is the fallback so a server created
//! by an invocation that died before recording its id is still adopted.
//!
//! A `name` in the spec only labels the created server. It never selects
//! which server an instance owns, so instances sharing a spec never share a
//! server.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::converge::{PollPolicy, await_state};
use crate::driver::{CreateServerRequest, ProviderDriver, ServerSnapshot, ServerState, SizeSelector};
use crate::error::ProvisionError;
use crate::naming::ResourceNamer;
use crate::properties::{IP, NETWORKS, RuntimeProperties, SERVER_ID};
use crate::provider::{ProviderContext, ProviderQuirks, SizeSelection};

const RESOURCE: &str = "server";
/// vCPU count used by RAM-sized families when none is requested.
pub const DEFAULT_VCPUS: u32 = 1;

/// Requested server configuration, as found in node properties.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ServerSpec {
    /// Label for a created server, before prefixing. Defaults to the
    /// instance identifier. Lookups always use the instance identifier.
    pub name: Option<String>,
    /// Image to boot from.
    pub image_name: Option<String>,
    /// Size name, for families that select sizes by name.
    pub size_name: Option<String>,
    /// Memory in megabytes, for families that select sizes by RAM.
    pub ram: Option<u32>,
    /// Number of virtual CPUs.
    pub vcpus: Option<u32>,
    /// Network to attach, for families that need one.
    pub management_network_name: Option<String>,
    /// Security groups to join, before prefixing.
    pub security_groups: Vec<String>,
    /// SSH key pair, before prefixing.
    pub key_name: Option<String>,
}

/// Identity and observed state of a managed server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerHandle {
    /// Provider identifier.
    pub id: String,
    /// Server name.
    pub name: String,
    /// State observed by the operation that returned the handle.
    pub state: ServerState,
}

impl From<ServerSnapshot> for ServerHandle {
    fn from(value: ServerSnapshot) -> Self {
        Self {
            id: value.id,
            name: value.name,
            state: value.state,
        }
    }
}

/// Result of a state observation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerObservation {
    /// `true` when the server exists and is running.
    pub active: bool,
    /// Private addresses; empty unless active.
    pub private_ips: Vec<String>,
    /// Public addresses; empty unless active.
    pub public_ips: Vec<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Drives servers through their lifecycle on one provider.
#[derive(Clone, Copy)]
pub struct ServerManager<'a> {
    driver: &'a dyn ProviderDriver,
    quirks: ProviderQuirks,
    context: &'a ProviderContext,
    namer: &'a ResourceNamer,
    policy: PollPolicy,
}

impl<'a> ServerManager<'a> {
    /// Creates a manager using the default server poll policy.
    #[must_use]
    pub const fn new(
        driver: &'a dyn ProviderDriver,
        quirks: ProviderQuirks,
        context: &'a ProviderContext,
        namer: &'a ResourceNamer,
    ) -> Self {
        Self {
            driver,
            quirks,
            context,
            namer,
            policy: PollPolicy::server_default(),
        }
    }

    /// Replaces the poll policy used for create and delete waits.
    #[must_use]
    pub const fn with_poll_policy(self, policy: PollPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Finds the live server for an instance: by stored id first, then by
    /// the prefixed instance identifier. Terminated servers count as absent
    /// and a stale id is dropped.
    async fn locate(
        &self,
        instance_id: &str,
        props: &mut RuntimeProperties,
    ) -> Result<Option<ServerSnapshot>, ProvisionError> {
        if let Some(stored) = props.get_str(SERVER_ID)?.map(str::to_owned) {
            match self.driver.get_server(&stored).await? {
                Some(server) if server.state != ServerState::Terminated => return Ok(Some(server)),
                _ => {
                    warn!(server_id = %stored, "stored server no longer exists; forgetting it");
                    props.remove(SERVER_ID);
                }
            }
        }
        Ok(self
            .driver
            .find_server_by_name(&self.namer.apply(instance_id))
            .await?
            .filter(|server| server.state != ServerState::Terminated))
    }

    async fn wait_for(&self, id: &str, target: ServerState) -> Result<(), ProvisionError> {
        await_state(id, &target, self.policy, || async move {
            Ok(self
                .driver
                .get_server(id)
                .await?
                .map_or(ServerState::Terminated, |server| server.state))
        })
        .await
    }

    /// Ensures a running server exists for `instance_id`, adopting an
    /// existing one when possible.
    ///
    /// A stopped server is started without waiting. A pending server is
    /// waited on. Otherwise a new server is created, its id recorded
    /// immediately, and the call converges on [`ServerState::Running`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingParameter`] or
    /// [`ProvisionError::NotFound`] for unusable specifications,
    /// [`ProvisionError::Precondition`] when an existing server is in an
    /// unmanageable state, [`ProvisionError::Timeout`] when the server never
    /// reaches running, and [`ProvisionError::Provider`] for driver failures.
    pub async fn ensure_running(
        &self,
        instance_id: &str,
        spec: &ServerSpec,
        props: &mut RuntimeProperties,
    ) -> Result<ServerHandle, ProvisionError> {
        if let Some(existing) = self.locate(instance_id, props).await? {
            props.set(SERVER_ID, existing.id.as_str());
            return self.adopt(existing).await;
        }

        let name = self
            .namer
            .apply(non_empty(spec.name.as_deref()).unwrap_or(instance_id));
        let request = self.build_request(name, spec).await?;
        info!(server = %request.name, "creating server");
        let created = self.driver.create_server(&request).await?;
        props.set(SERVER_ID, created.id.as_str());
        self.wait_for(&created.id, ServerState::Running).await?;
        info!(server_id = %created.id, server = %created.name, "server is running");
        Ok(ServerHandle {
            state: ServerState::Running,
            ..ServerHandle::from(created)
        })
    }

    async fn adopt(&self, existing: ServerSnapshot) -> Result<ServerHandle, ProvisionError> {
        match existing.state {
            ServerState::Running => {
                info!(server_id = %existing.id, "server already running");
                Ok(existing.into())
            }
            ServerState::Stopped => {
                info!(server_id = %existing.id, "starting stopped server");
                self.driver.start_server(&existing.id).await?;
                Ok(ServerHandle {
                    state: ServerState::Pending,
                    ..existing.into()
                })
            }
            ServerState::Pending => {
                info!(server_id = %existing.id, "waiting for pending server");
                self.wait_for(&existing.id, ServerState::Running).await?;
                Ok(ServerHandle {
                    state: ServerState::Running,
                    ..existing.into()
                })
            }
            ServerState::Unknown | ServerState::Terminated => Err(ProvisionError::Precondition {
                resource: existing.id,
                action: String::from("start server"),
                reason: format!("server is in state {}", existing.state),
            }),
        }
    }

    async fn build_request(
        &self,
        name: String,
        spec: &ServerSpec,
    ) -> Result<CreateServerRequest, ProvisionError> {
        let image_name = non_empty(spec.image_name.as_deref())
            .ok_or_else(|| ProvisionError::missing(RESOURCE, "image_name"))?;
        let selector = match self.quirks.size_selection {
            SizeSelection::ByName => non_empty(spec.size_name.as_deref())
                .map(|size| SizeSelector::Named(size.to_owned()))
                .ok_or_else(|| ProvisionError::missing(RESOURCE, "size_name"))?,
            SizeSelection::ByRam => spec
                .ram
                .map(SizeSelector::Ram)
                .ok_or_else(|| ProvisionError::missing(RESOURCE, "ram"))?,
        };
        let network = non_empty(spec.management_network_name.as_deref()).map(str::to_owned);
        if self.quirks.requires_network && network.is_none() {
            return Err(ProvisionError::missing(RESOURCE, "management_network_name"));
        }
        let key_name = self.key_name(spec)?;
        let vcpus = match self.quirks.size_selection {
            SizeSelection::ByRam => Some(spec.vcpus.unwrap_or(DEFAULT_VCPUS)),
            SizeSelection::ByName => spec.vcpus,
        };

        let image_id = self
            .driver
            .find_image(image_name)
            .await?
            .ok_or_else(|| ProvisionError::not_found("image", image_name))?;
        let size_id = self
            .driver
            .find_size(&selector)
            .await?
            .ok_or_else(|| ProvisionError::not_found("size", &selector.to_string()))?;

        Ok(CreateServerRequest {
            name,
            image_id,
            size_id,
            vcpus,
            network,
            security_groups: self.security_groups(spec),
            key_name,
        })
    }

    /// Prefixed requested groups plus the provider's agents group.
    fn security_groups(&self, spec: &ServerSpec) -> Vec<String> {
        let mut groups: Vec<String> = spec
            .security_groups
            .iter()
            .map(|group| self.namer.apply(group))
            .collect();
        if let Some(agents) = self.context.agents_security_group_name()
            && !groups.iter().any(|group| group == agents)
        {
            groups.push(agents.to_owned());
        }
        groups
    }

    fn key_name(&self, spec: &ServerSpec) -> Result<Option<String>, ProvisionError> {
        if let Some(key) = non_empty(spec.key_name.as_deref()) {
            return Ok(Some(self.namer.apply(key)));
        }
        if let Some(agents_key) = self.context.agents_keypair_name() {
            return Ok(Some(agents_key.to_owned()));
        }
        if self.quirks.requires_key_pair {
            return Err(ProvisionError::missing(RESOURCE, "key_name"));
        }
        Ok(None)
    }

    /// Returns the live server for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Precondition`] when no server exists.
    pub async fn handle(
        &self,
        instance_id: &str,
        props: &mut RuntimeProperties,
    ) -> Result<ServerHandle, ProvisionError> {
        self.locate(instance_id, props)
            .await?
            .map(ServerHandle::from)
            .ok_or_else(|| Self::absent(instance_id, "use"))
    }

    fn absent(instance_id: &str, action: &str) -> ProvisionError {
        ProvisionError::Precondition {
            resource: instance_id.to_owned(),
            action: format!("{action} server"),
            reason: String::from("server doesn't exist"),
        }
    }

    /// Powers off the instance's server. Does not wait.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Precondition`] when no server exists.
    pub async fn stop(
        &self,
        instance_id: &str,
        props: &mut RuntimeProperties,
    ) -> Result<(), ProvisionError> {
        let Some(server) = self.locate(instance_id, props).await? else {
            return Err(Self::absent(instance_id, "stop"));
        };
        info!(server_id = %server.id, "stopping server");
        self.driver.stop_server(&server.id).await?;
        Ok(())
    }

    /// Deletes the instance's server and waits until it is gone. A missing
    /// server is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Timeout`] when the server lingers and
    /// [`ProvisionError::Provider`] for driver failures.
    pub async fn delete(
        &self,
        instance_id: &str,
        props: &mut RuntimeProperties,
    ) -> Result<(), ProvisionError> {
        let Some(server) = self.locate(instance_id, props).await? else {
            info!(instance = instance_id, "no server to delete");
            return Ok(());
        };
        info!(server_id = %server.id, "deleting server");
        self.driver.delete_server(&server.id).await?;
        self.wait_for(&server.id, ServerState::Terminated).await?;
        props.remove(SERVER_ID);
        info!(server_id = %server.id, "server deleted");
        Ok(())
    }

    /// Reports whether the instance's server is active, recording its
    /// addresses under `networks` and `ip` when it is.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Provider`] for driver failures.
    pub async fn observe_state(
        &self,
        instance_id: &str,
        props: &mut RuntimeProperties,
    ) -> Result<ServerObservation, ProvisionError> {
        let server = self.locate(instance_id, props).await?;
        let Some(active) = server.filter(|found| found.state == ServerState::Running) else {
            return Ok(ServerObservation::default());
        };
        info!(server = %active.name, "server is active");
        props.set(
            NETWORKS,
            json!({"private": active.private_ips, "public": active.public_ips}),
        );
        if let Some(first) = active.private_ips.first() {
            props.set(IP, first.as_str());
        }
        Ok(ServerObservation {
            active: true,
            private_ips: active.private_ips,
            public_ips: active.public_ips,
        })
    }
}
