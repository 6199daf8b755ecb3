//! Server reads, creation and power actions.

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::driver::{CreateServerRequest, DriverError, ServerSnapshot, ServerState};

use super::ScalewayDriver;
use super::types::{CreateServerPayload, ServerBody, ServerEnvelope, ServerList};

/// Tag applied to every server this backend creates.
const SERVER_TAG: &str = "stratus";

impl ScalewayDriver {
    pub(super) async fn fetch_server(
        &self,
        id: &str,
    ) -> Result<Option<ServerSnapshot>, DriverError> {
        let envelope: Option<ServerEnvelope> =
            self.get_optional(&format!("servers/{id}")).await?;
        Ok(envelope.map(|found| found.server.into_snapshot()))
    }

    /// The API filters names by substring, so exact matches are picked
    /// client-side.
    pub(super) async fn lookup_server_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ServerSnapshot>, DriverError> {
        let servers = self
            .list_all(
                "servers",
                &[("name", name), ("project", self.project_id.as_str())],
                |listing: ServerList| listing.servers,
            )
            .await?;
        let mut matches = servers
            .into_iter()
            .filter(|server| server.name == name);
        let first = matches.next();
        if matches.next().is_some() {
            warn!(name, "several servers share the name; adopting the first");
        }
        Ok(first.map(ServerBody::into_snapshot))
    }

    async fn resolve_security_group_id(&self, name: &str) -> Result<String, DriverError> {
        let groups = self.security_groups_named(name).await?;
        match groups.as_slice() {
            [group] => Ok(group.id.clone()),
            [] => Err(DriverError::Api {
                status: 404,
                message: format!("security group '{name}' not found"),
            }),
            _ => Err(DriverError::Api {
                status: 409,
                message: format!("security group name '{name}' is ambiguous"),
            }),
        }
    }

    /// Scaleway servers are created stopped; this powers the new server on so
    /// it converges towards running like on other providers.
    pub(super) async fn create_and_power_on(
        &self,
        request: &CreateServerRequest,
    ) -> Result<ServerSnapshot, DriverError> {
        let security_group = match request.security_groups.split_first() {
            Some((first, rest)) => {
                if !rest.is_empty() {
                    warn!(
                        server = %request.name,
                        ignored = ?rest,
                        "Scaleway servers join a single security group"
                    );
                }
                Some(self.resolve_security_group_id(first).await?)
            }
            None => None,
        };
        if let Some(network) = &request.network {
            debug!(network = %network, "Scaleway attaches the default network; ignoring network");
        }

        let payload = CreateServerPayload {
            name: &request.name,
            commercial_type: &request.size_id,
            image: &request.image_id,
            project: &self.project_id,
            dynamic_ip_required: true,
            tags: vec![String::from(SERVER_TAG)],
            security_group,
        };
        let created: ServerEnvelope = self
            .send_payload(Method::POST, "servers", &payload)
            .await?;
        let body = created.server;
        info!(server_id = %body.id, name = %body.name, "created Scaleway server");

        if body.state == "running" {
            return Ok(body.into_snapshot());
        }
        if !body.allowed_actions.iter().any(|action| action == "poweron") {
            return Err(DriverError::InvalidState {
                resource: String::from("server"),
                id: body.id,
                state: body.state,
                action: String::from("poweron"),
            });
        }
        self.server_action(&body.id, "poweron").await?;
        let mut snapshot = body.into_snapshot();
        snapshot.state = ServerState::Pending;
        Ok(snapshot)
    }

    pub(super) async fn server_action(&self, id: &str, action: &str) -> Result<(), DriverError> {
        self.api
            .perform_instance_action_async(self.zone.as_str(), id, action)
            .await?;
        debug!(server_id = id, action, "requested Scaleway server action");
        Ok(())
    }

    /// Running servers are terminated, which also removes their volumes;
    /// stopped servers can be deleted directly.
    pub(super) async fn remove_server(&self, id: &str) -> Result<(), DriverError> {
        let Some(server) = self.fetch_server(id).await? else {
            return Ok(());
        };
        if server.state == ServerState::Running {
            return self.server_action(id, "terminate").await;
        }
        self.api
            .delete_instance_async(self.zone.as_str(), id)
            .await?;
        Ok(())
    }
}
