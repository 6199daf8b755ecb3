//! Ingress rule model shared by the security-group reconciler and drivers.
//!
//! A rule always names exactly one remote: either a CIDR prefix or another
//! security group. [`RemoteRef`] makes that a property of the type rather
//! than a convention between two optional fields.
//!
//! Equivalence between an existing group's rules and a requested rule set is
//! decided on canonical forms: provider-assigned identifiers (`id`,
//! `security_group_id`, `tenant_id`) are stripped, the remainder is rendered
//! as key-sorted JSON, and the two sides are compared as sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// Fields assigned by providers that never take part in rule comparison.
pub const PROVIDER_ASSIGNED_FIELDS: [&str; 3] = ["id", "security_group_id", "tenant_id"];

/// Lowest port accepted in a rule range.
pub const MIN_PORT: u16 = 1;
/// Highest port accepted in a rule range.
pub const MAX_PORT: u16 = 65535;

/// Traffic direction of a rule. Only ingress rules are managed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound traffic.
    #[default]
    Ingress,
}

/// Remote side of an ingress rule.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum RemoteRef {
    /// Traffic allowed from a CIDR prefix.
    #[serde(rename = "remote_ip_prefix")]
    IpPrefix(String),
    /// Traffic allowed from members of another security group.
    #[serde(rename = "remote_group_id")]
    GroupId(String),
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpPrefix(prefix) => write!(f, "{prefix}"),
            Self::GroupId(id) => write!(f, "group {id}"),
        }
    }
}

/// Fully resolved ingress rule.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct IngressRule {
    /// Always [`Direction::Ingress`].
    #[serde(default)]
    pub direction: Direction,
    /// First port of the range (inclusive).
    pub port_range_min: u16,
    /// Last port of the range (inclusive).
    pub port_range_max: u16,
    /// Lower-case protocol name, for example `tcp`.
    pub protocol: String,
    /// The single remote the rule admits traffic from.
    #[serde(flatten)]
    pub remote: RemoteRef,
}

impl IngressRule {
    /// Builds a rule, normalising the protocol to lower case.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidRule`] when the port range is empty,
    /// starts below [`MIN_PORT`], or the protocol or remote is blank.
    pub fn new(
        port_range_min: u16,
        port_range_max: u16,
        protocol: impl Into<String>,
        remote: RemoteRef,
    ) -> Result<Self, ProvisionError> {
        let protocol_name = protocol.into().trim().to_ascii_lowercase();
        if protocol_name.is_empty() {
            return Err(ProvisionError::InvalidRule(String::from(
                "protocol must not be empty",
            )));
        }
        if port_range_min < MIN_PORT || port_range_min > port_range_max {
            return Err(ProvisionError::InvalidRule(format!(
                "port range {port_range_min}-{port_range_max} is not valid"
            )));
        }
        let remote_value = match &remote {
            RemoteRef::IpPrefix(value) | RemoteRef::GroupId(value) => value,
        };
        if remote_value.trim().is_empty() {
            return Err(ProvisionError::InvalidRule(String::from(
                "remote reference must not be empty",
            )));
        }
        Ok(Self {
            direction: Direction::Ingress,
            port_range_min,
            port_range_max,
            protocol: protocol_name,
            remote,
        })
    }

    /// Returns `true` when the rule references another security group.
    #[must_use]
    pub const fn references_group(&self) -> bool {
        matches!(self.remote, RemoteRef::GroupId(_))
    }

    /// Canonical, key-sorted JSON rendering used for equivalence checks.
    #[must_use]
    pub fn canonical_form(&self) -> String {
        canonical_json(self)
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{} from {}",
            self.protocol, self.port_range_min, self.port_range_max, self.remote
        )
    }
}

/// Rule as reported by a provider, including the identifiers it assigned.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObservedRule {
    /// Provider identifier of the rule itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identifier of the group that owns the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    /// Tenant or account that owns the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// The rule content.
    #[serde(flatten)]
    pub rule: IngressRule,
}

impl ObservedRule {
    /// Canonical form with every provider-assigned field removed.
    #[must_use]
    pub fn canonical_form(&self) -> String {
        canonical_json(self)
    }
}

/// Renders a value as JSON with provider-assigned keys stripped.
///
/// `serde_json::Map` is ordered by key, so the output is key-sorted
/// regardless of field declaration order.
fn canonical_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(mut fields)) => {
            for excluded in PROVIDER_ASSIGNED_FIELDS {
                fields.remove(excluded);
            }
            serde_json::Value::Object(fields).to_string()
        }
        Ok(other) => other.to_string(),
        Err(err) => format!("<unserialisable rule: {err}>"),
    }
}

/// Returns the set of canonical forms for a collection of observed rules.
#[must_use]
pub fn canonical_set<'a>(rules: impl IntoIterator<Item = &'a ObservedRule>) -> BTreeSet<String> {
    rules.into_iter().map(ObservedRule::canonical_form).collect()
}

/// Order-independent equivalence between observed and requested rules.
///
/// Duplicates collapse and ordering is ignored on both sides.
#[must_use]
pub fn rules_equivalent(existing: &[ObservedRule], requested: &[IngressRule]) -> bool {
    let requested_forms: BTreeSet<String> =
        requested.iter().map(IngressRule::canonical_form).collect();
    canonical_set(existing) == requested_forms
}

/// Renders rules for diagnostics, for example `[tcp 22-22 from 0.0.0.0/0]`.
#[must_use]
pub fn describe_rules(rules: &[IngressRule]) -> String {
    let rendered: Vec<String> = rules.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}
