//! Wire types for the Scaleway Instances API and their mapping onto driver
//! snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::{DriverError, FloatingIp, SecurityGroupSnapshot, ServerSnapshot, ServerState};
use crate::rules::{IngressRule, MAX_PORT, MIN_PORT, ObservedRule, RemoteRef};

/// Scaleway zone identifier, for example `fr-par-1`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Zone(String);

impl Zone {
    pub(crate) const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Zone {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Maps a Scaleway server state string onto the lifecycle state. A server
/// that is still stopping is already past running and counts as stopped.
pub(super) fn map_state(state: &str) -> ServerState {
    match state {
        "running" => ServerState::Running,
        "stopped" | "stopped in place" | "stopping" => ServerState::Stopped,
        "starting" => ServerState::Pending,
        _ => ServerState::Unknown,
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AddressRef {
    pub(super) address: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerBody {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) state: String,
    #[serde(default)]
    pub(super) allowed_actions: Vec<String>,
    #[serde(default)]
    pub(super) private_ip: Option<String>,
    #[serde(default)]
    pub(super) public_ip: Option<AddressRef>,
    #[serde(default)]
    pub(super) public_ips: Vec<AddressRef>,
}

impl ServerBody {
    pub(super) fn into_snapshot(self) -> ServerSnapshot {
        let mut public_ips: Vec<String> = self
            .public_ips
            .into_iter()
            .map(|ip| ip.address)
            .collect();
        if let Some(legacy) = self.public_ip
            && !public_ips.contains(&legacy.address)
        {
            public_ips.insert(0, legacy.address);
        }
        ServerSnapshot {
            state: map_state(&self.state),
            id: self.id,
            name: self.name,
            private_ips: self.private_ip.into_iter().collect(),
            public_ips,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: ServerBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerList {
    #[serde(default)]
    pub(super) servers: Vec<ServerBody>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateServerPayload<'a> {
    pub(super) name: &'a str,
    pub(super) commercial_type: &'a str,
    pub(super) image: &'a str,
    pub(super) project: &'a str,
    pub(super) dynamic_ip_required: bool,
    pub(super) tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) security_group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ProductBody {
    #[serde(default)]
    pub(super) ram: u64,
    #[serde(default)]
    pub(super) ncpus: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProductList {
    #[serde(default)]
    pub(super) servers: BTreeMap<String, ProductBody>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerRef {
    pub(super) id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct IpBody {
    pub(super) id: String,
    pub(super) address: String,
    #[serde(default)]
    pub(super) server: Option<ServerRef>,
}

impl From<IpBody> for FloatingIp {
    fn from(value: IpBody) -> Self {
        Self {
            id: value.id,
            address: value.address,
            server_id: value.server.map(|server| server.id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct IpEnvelope {
    pub(super) ip: IpBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct IpList {
    #[serde(default)]
    pub(super) ips: Vec<IpBody>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SecurityGroupBody {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) description: Option<String>,
}

impl SecurityGroupBody {
    pub(super) fn into_snapshot(self, rules: Vec<ObservedRule>) -> SecurityGroupSnapshot {
        SecurityGroupSnapshot {
            id: self.id,
            name: self.name,
            description: self.description.filter(|text| !text.is_empty()),
            rules,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SecurityGroupEnvelope {
    pub(super) security_group: SecurityGroupBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct SecurityGroupList {
    #[serde(default)]
    pub(super) security_groups: Vec<SecurityGroupBody>,
}

const fn default_editable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(super) struct RuleBody {
    pub(super) id: String,
    pub(super) protocol: String,
    pub(super) direction: String,
    pub(super) action: String,
    pub(super) ip_range: String,
    #[serde(default)]
    pub(super) dest_port_from: Option<u16>,
    #[serde(default)]
    pub(super) dest_port_to: Option<u16>,
    #[serde(default = "default_editable")]
    pub(super) editable: bool,
}

impl RuleBody {
    /// Converts an inbound accept rule into an observed ingress rule.
    ///
    /// Outbound, drop and provider-managed (non-editable) rules return
    /// `None`. A missing port means the whole range; a missing upper bound
    /// means a single port.
    pub(super) fn into_observed(self, group_id: &str) -> Result<Option<ObservedRule>, DriverError> {
        if self.direction != "inbound" || self.action != "accept" || !self.editable {
            return Ok(None);
        }
        let (min, max) = match (self.dest_port_from, self.dest_port_to) {
            (None, _) => (MIN_PORT, MAX_PORT),
            (Some(from), None) => (from, from),
            (Some(from), Some(to)) => (from, to),
        };
        let rule = IngressRule::new(min, max, self.protocol, RemoteRef::IpPrefix(self.ip_range))
            .map_err(|err| DriverError::Decode {
                message: format!("rule {}: {err}", self.id),
            })?;
        Ok(Some(ObservedRule {
            id: Some(self.id),
            security_group_id: Some(group_id.to_owned()),
            tenant_id: None,
            rule,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RuleList {
    #[serde(default)]
    pub(super) rules: Vec<RuleBody>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateRulePayload<'a> {
    pub(super) protocol: String,
    pub(super) direction: &'static str,
    pub(super) action: &'static str,
    pub(super) ip_range: &'a str,
    pub(super) dest_port_from: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) dest_port_to: Option<u16>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateGroupPayload<'a> {
    pub(super) name: &'a str,
    pub(super) description: &'a str,
    pub(super) project: &'a str,
    pub(super) stateful: bool,
    pub(super) inbound_default_policy: &'static str,
    pub(super) outbound_default_policy: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct RouteIpPayload<'a> {
    pub(super) server: Option<&'a str>,
}
