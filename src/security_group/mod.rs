//! Security group create-or-adopt with rule-set reconciliation.
//!
//! An existing group with the requested name is adopted only when its
//! description and canonical rule set both match the request. Existing
//! groups are never modified: any difference is reported as a conflict.

mod remote;

pub use remote::{
    DEFAULT_PROTOCOL, DEFAULT_REMOTE_PREFIX, PeerDirectory, RuleSpec, host_prefix, node_name_of,
};

use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{DriverError, ProviderDriver, SecurityGroupSnapshot};
use crate::error::ProvisionError;
use crate::naming::ResourceNamer;
use crate::properties::{EXTERNAL_ID, RuntimeProperties};
use crate::provider::ProviderQuirks;
use crate::rules::{IngressRule, ObservedRule, rules_equivalent};

const RESOURCE: &str = "security group";

/// Requested security group, as found in node properties.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SecurityGroupRequest {
    /// Group name before prefixing. Defaults to the node identifier.
    pub name: Option<String>,
    /// Group description.
    pub description: Option<String>,
    /// Requested ingress rules.
    pub rules: Vec<RuleSpec>,
}

/// Desired group after naming and remote resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityGroupSpec {
    /// Final group name.
    pub name: String,
    /// Description; empty descriptions are stored as `None`.
    pub description: Option<String>,
    /// Resolved rules, in request order.
    pub rules: Vec<IngressRule>,
}

/// Why an existing group cannot be adopted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConflictDetail {
    /// Several groups already carry the name.
    DuplicateName {
        /// Group name.
        name: String,
        /// Number of groups found.
        count: usize,
    },
    /// The name matches but the description does not.
    DescriptionMismatch {
        /// Group name.
        name: String,
        /// Description of the existing group.
        existing: Option<String>,
        /// Requested description.
        requested: Option<String>,
    },
    /// The name and description match but the rules do not.
    RulesMismatch {
        /// Group name.
        name: String,
        /// Rules on the existing group, without provider identifiers.
        existing: Vec<IngressRule>,
        /// Requested rules.
        requested: Vec<IngressRule>,
    },
}

impl From<ConflictDetail> for ProvisionError {
    fn from(value: ConflictDetail) -> Self {
        match value {
            ConflictDetail::DuplicateName { name, count } => Self::Conflict {
                detail: format!("{count} security groups named '{name}' already exist"),
                resource: name,
            },
            ConflictDetail::DescriptionMismatch {
                name,
                existing,
                requested,
            } => Self::Conflict {
                detail: format!(
                    "existing description {existing:?} does not match requested description {requested:?}"
                ),
                resource: name,
            },
            ConflictDetail::RulesMismatch {
                name,
                existing,
                requested,
            } => Self::RulesMismatch {
                name,
                existing,
                requested,
            },
        }
    }
}

/// Tagged outcome of a reconciliation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconciliationResult {
    /// A new group was created; carries its identifier.
    Created(String),
    /// An equivalent existing group was adopted; carries its identifier.
    Reused(String),
    /// An existing group blocks the request. Nothing was changed.
    Conflict(ConflictDetail),
}

impl ReconciliationResult {
    /// Identifier of the created or adopted group.
    ///
    /// # Errors
    ///
    /// Converts [`ReconciliationResult::Conflict`] into
    /// [`ProvisionError::Conflict`] or [`ProvisionError::RulesMismatch`].
    pub fn into_id(self) -> Result<String, ProvisionError> {
        match self {
            Self::Created(id) | Self::Reused(id) => Ok(id),
            Self::Conflict(detail) => Err(detail.into()),
        }
    }
}

fn normalise_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

fn stripped(rules: &[ObservedRule]) -> Vec<IngressRule> {
    rules.iter().map(|observed| observed.rule.clone()).collect()
}

/// Compares one existing group with the desired spec.
///
/// Returns [`ReconciliationResult::Reused`] or
/// [`ReconciliationResult::Conflict`]; never `Created`.
#[must_use]
pub fn compare_existing(
    existing: &SecurityGroupSnapshot,
    desired: &SecurityGroupSpec,
) -> ReconciliationResult {
    let existing_description = normalise_description(existing.description.as_deref());
    if existing_description != desired.description {
        return ReconciliationResult::Conflict(ConflictDetail::DescriptionMismatch {
            name: desired.name.clone(),
            existing: existing_description,
            requested: desired.description.clone(),
        });
    }
    if rules_equivalent(&existing.rules, &desired.rules) {
        ReconciliationResult::Reused(existing.id.clone())
    } else {
        ReconciliationResult::Conflict(ConflictDetail::RulesMismatch {
            name: desired.name.clone(),
            existing: stripped(&existing.rules),
            requested: desired.rules.clone(),
        })
    }
}

/// Reconciles requested security groups against one provider.
#[derive(Clone, Copy)]
pub struct SecurityGroupReconciler<'a> {
    driver: &'a dyn ProviderDriver,
    quirks: ProviderQuirks,
    namer: &'a ResourceNamer,
}

impl<'a> SecurityGroupReconciler<'a> {
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(
        driver: &'a dyn ProviderDriver,
        quirks: ProviderQuirks,
        namer: &'a ResourceNamer,
    ) -> Self {
        Self {
            driver,
            quirks,
            namer,
        }
    }

    /// Builds the desired group: prefixed name and resolved rules.
    ///
    /// Only read calls reach the provider.
    ///
    /// # Errors
    ///
    /// Returns remote resolution failures, invalid rules, and
    /// [`DriverError::Unsupported`] (wrapped) when a rule
    /// references a group on a family that cannot express it.
    pub async fn desired_spec(
        &self,
        node_id: &str,
        request: &SecurityGroupRequest,
        peers: &dyn PeerDirectory,
    ) -> Result<SecurityGroupSpec, ProvisionError> {
        let base_name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(node_id);
        let mut rules = Vec::with_capacity(request.rules.len());
        for rule in &request.rules {
            let resolved = remote::resolve_rule(self.driver, peers, rule).await?;
            debug!(rule = %resolved, "resolved ingress rule");
            rules.push(resolved);
        }
        if !self.quirks.remote_group_rules && rules.iter().any(IngressRule::references_group) {
            return Err(DriverError::unsupported(
                self.driver.family(),
                "rules referencing another security group",
            )
            .into());
        }
        Ok(SecurityGroupSpec {
            name: self.namer.apply(base_name),
            description: normalise_description(request.description.as_deref()),
            rules,
        })
    }

    /// Creates the group or adopts an equivalent existing one.
    ///
    /// On `Created` and `Reused` the group id is stored under
    /// `external_id`. A `Conflict` leaves both the provider and the bag
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SecurityGroupReconciler::desired_spec`] and
    /// [`ProvisionError::Provider`] for failed provider calls.
    pub async fn reconcile(
        &self,
        node_id: &str,
        request: &SecurityGroupRequest,
        peers: &dyn PeerDirectory,
        props: &mut RuntimeProperties,
    ) -> Result<ReconciliationResult, ProvisionError> {
        let desired = self.desired_spec(node_id, request, peers).await?;
        let mut existing = self.driver.list_security_groups(&desired.name).await?;
        let outcome = if existing.len() > 1 {
            ReconciliationResult::Conflict(ConflictDetail::DuplicateName {
                name: desired.name.clone(),
                count: existing.len(),
            })
        } else if let Some(group) = existing.pop() {
            info!(name = %desired.name, group_id = %group.id, "found existing security group");
            compare_existing(&group, &desired)
        } else {
            ReconciliationResult::Created(self.create(&desired, props).await?)
        };
        if let ReconciliationResult::Reused(id) = &outcome {
            info!(name = %desired.name, group_id = %id, "using existing security group");
            props.set(EXTERNAL_ID, id.as_str());
        }
        Ok(outcome)
    }

    /// Like [`SecurityGroupReconciler::reconcile`] but treats conflicts as
    /// errors and returns the group identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Conflict`] or
    /// [`ProvisionError::RulesMismatch`] for conflicts, plus every error of
    /// [`SecurityGroupReconciler::reconcile`].
    pub async fn ensure(
        &self,
        node_id: &str,
        request: &SecurityGroupRequest,
        peers: &dyn PeerDirectory,
        props: &mut RuntimeProperties,
    ) -> Result<String, ProvisionError> {
        self.reconcile(node_id, request, peers, props)
            .await?
            .into_id()
    }

    async fn create(
        &self,
        desired: &SecurityGroupSpec,
        props: &mut RuntimeProperties,
    ) -> Result<String, ProvisionError> {
        let group = self
            .driver
            .create_security_group(&desired.name, desired.description.as_deref())
            .await?;
        props.set(EXTERNAL_ID, group.id.as_str());
        info!(name = %group.name, group_id = %group.id, "created security group");
        for rule in &desired.rules {
            self.driver.create_ingress_rule(&group.id, rule).await?;
        }
        Ok(group.id)
    }

    /// Deletes the group recorded under `external_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DeleteFailed`] when the provider rejects
    /// the deletion.
    pub async fn delete(&self, props: &mut RuntimeProperties) -> Result<(), ProvisionError> {
        let Some(id) = props.get_str(EXTERNAL_ID)?.map(str::to_owned) else {
            info!("no security group recorded; nothing to delete");
            return Ok(());
        };
        self.driver
            .delete_security_group(&id)
            .await
            .map_err(|source| ProvisionError::DeleteFailed {
                resource: String::from(RESOURCE),
                id: id.clone(),
                source: Box::new(source),
            })?;
        props.remove(EXTERNAL_ID);
        info!(group_id = %id, "deleted security group");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
