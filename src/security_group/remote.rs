//! Resolution of rule remotes: named groups, peer nodes, ids and prefixes.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Deserialize;

use crate::driver::ProviderDriver;
use crate::error::ProvisionError;
use crate::rules::{IngressRule, MAX_PORT, MIN_PORT, RemoteRef};

/// Prefix admitted when a rule names no remote at all.
pub const DEFAULT_REMOTE_PREFIX: &str = "0.0.0.0/0";
/// Protocol used when a rule names none.
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// One requested ingress rule, before remote resolution.
///
/// At most one remote is honoured, by precedence: `remote_group_name`,
/// `remote_group_node`, `remote_group_id`, `remote_ip_prefix`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RuleSpec {
    /// Single port; sets both ends of the range unless they are given.
    pub port: Option<u16>,
    /// First port of the range.
    pub port_range_min: Option<u16>,
    /// Last port of the range.
    pub port_range_max: Option<u16>,
    /// Protocol; defaults to [`DEFAULT_PROTOCOL`].
    pub protocol: Option<String>,
    /// CIDR prefix to admit.
    pub remote_ip_prefix: Option<String>,
    /// Provider identifier of a group to admit.
    pub remote_group_id: Option<String>,
    /// Name of a group to admit; must match exactly one group.
    pub remote_group_name: Option<String>,
    /// Logical node whose single instance address is admitted.
    pub remote_group_node: Option<String>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Addresses of the other node instances in the deployment.
///
/// Instance identifiers have the form `<node>_<suffix>`; everything before
/// the last underscore names the node.
pub trait PeerDirectory: Send + Sync {
    /// Identifiers of every known instance.
    fn instance_ids(&self) -> Vec<String>;

    /// Address of an instance, when it has one.
    fn address_of(&self, instance_id: &str) -> Option<String>;
}

impl PeerDirectory for BTreeMap<String, String> {
    fn instance_ids(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn address_of(&self, instance_id: &str) -> Option<String> {
        self.get(instance_id).cloned()
    }
}

/// Node name of an instance identifier, if it has the `<node>_<suffix>`
/// shape.
#[must_use]
pub fn node_name_of(instance_id: &str) -> Option<&str> {
    instance_id.rsplit_once('_').map(|(node, _)| node)
}

/// Host prefix for a single address: `/32` for IPv4, `/128` for IPv6.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidRule`] when `address` is not an IP
/// address.
pub fn host_prefix(address: &str) -> Result<String, ProvisionError> {
    let parsed: IpAddr = address.trim().parse().map_err(|_| {
        ProvisionError::InvalidRule(format!("peer address '{address}' is not an IP address"))
    })?;
    let bits = if parsed.is_ipv4() { 32 } else { 128 };
    Ok(format!("{parsed}/{bits}"))
}

/// Resolves the single instance of `node` to a host prefix.
///
/// # Errors
///
/// Returns [`ProvisionError::NotFound`] when no instance (or no address)
/// exists and [`ProvisionError::AmbiguousReference`] when several do.
pub fn resolve_peer(peers: &dyn PeerDirectory, node: &str) -> Result<String, ProvisionError> {
    let matches: Vec<String> = peers
        .instance_ids()
        .into_iter()
        .filter(|instance| node_name_of(instance) == Some(node))
        .collect();
    let instance = match matches.as_slice() {
        [] => return Err(ProvisionError::not_found("peer node", node)),
        [only] => only,
        _ => {
            return Err(ProvisionError::AmbiguousReference {
                kind: String::from("peer node"),
                reference: node.to_owned(),
                matches: matches.len(),
            });
        }
    };
    let address = peers
        .address_of(instance)
        .ok_or_else(|| ProvisionError::not_found("peer node address", instance))?;
    host_prefix(&address)
}

/// Resolves a group name to the identifier of the one group carrying it.
///
/// # Errors
///
/// Returns [`ProvisionError::NotFound`] or
/// [`ProvisionError::AmbiguousReference`] unless exactly one group matches.
pub async fn resolve_group_name(
    driver: &dyn ProviderDriver,
    name: &str,
) -> Result<String, ProvisionError> {
    let mut groups = driver.list_security_groups(name).await?;
    match groups.len() {
        0 => Err(ProvisionError::not_found("security group", name)),
        1 => groups
            .pop()
            .map(|group| group.id)
            .ok_or_else(|| ProvisionError::not_found("security group", name)),
        count => Err(ProvisionError::AmbiguousReference {
            kind: String::from("security group"),
            reference: name.to_owned(),
            matches: count,
        }),
    }
}

/// Turns a requested rule into a concrete one.
///
/// # Errors
///
/// Propagates remote resolution failures and rejects invalid port ranges.
pub async fn resolve_rule(
    driver: &dyn ProviderDriver,
    peers: &dyn PeerDirectory,
    spec: &RuleSpec,
) -> Result<IngressRule, ProvisionError> {
    let remote = if let Some(group_name) = present(spec.remote_group_name.as_deref()) {
        RemoteRef::GroupId(resolve_group_name(driver, group_name).await?)
    } else if let Some(node) = present(spec.remote_group_node.as_deref()) {
        RemoteRef::IpPrefix(resolve_peer(peers, node)?)
    } else if let Some(group_id) = present(spec.remote_group_id.as_deref()) {
        RemoteRef::GroupId(group_id.to_owned())
    } else {
        let prefix = present(spec.remote_ip_prefix.as_deref()).unwrap_or(DEFAULT_REMOTE_PREFIX);
        RemoteRef::IpPrefix(prefix.to_owned())
    };
    let protocol = present(spec.protocol.as_deref()).unwrap_or(DEFAULT_PROTOCOL);
    IngressRule::new(
        spec.port_range_min.or(spec.port).unwrap_or(MIN_PORT),
        spec.port_range_max.or(spec.port).unwrap_or(MAX_PORT),
        protocol,
        remote,
    )
}
