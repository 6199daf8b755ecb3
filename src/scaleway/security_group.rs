//! Security group and inbound rule calls.

use reqwest::Method;
use tracing::info;

use crate::driver::{DriverError, SecurityGroupSnapshot};
use crate::rules::{IngressRule, ObservedRule, RemoteRef};

use super::ScalewayDriver;
use super::types::{
    CreateGroupPayload, CreateRulePayload, RuleList, SecurityGroupEnvelope, SecurityGroupList,
};

impl ScalewayDriver {
    async fn group_rules(&self, group_id: &str) -> Result<Vec<ObservedRule>, DriverError> {
        let rules = self
            .list_all(
                &format!("security_groups/{group_id}/rules"),
                &[],
                |listing: RuleList| listing.rules,
            )
            .await?;
        let mut observed = Vec::with_capacity(rules.len());
        for rule in rules {
            if let Some(converted) = rule.into_observed(group_id)? {
                observed.push(converted);
            }
        }
        Ok(observed)
    }

    pub(super) async fn security_groups_named(
        &self,
        name: &str,
    ) -> Result<Vec<SecurityGroupSnapshot>, DriverError> {
        let listed = self
            .list_all(
                "security_groups",
                &[("name", name), ("project", self.project_id.as_str())],
                |listing: SecurityGroupList| listing.security_groups,
            )
            .await?;
        let mut groups = Vec::new();
        for group in listed {
            if group.name != name {
                continue;
            }
            let rules = self.group_rules(&group.id).await?;
            groups.push(group.into_snapshot(rules));
        }
        Ok(groups)
    }

    pub(super) async fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<SecurityGroupSnapshot, DriverError> {
        let payload = CreateGroupPayload {
            name,
            description: description.unwrap_or_default(),
            project: &self.project_id,
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
        };
        let created: SecurityGroupEnvelope = self
            .send_payload(Method::POST, "security_groups", &payload)
            .await?;
        let group = created.security_group.into_snapshot(Vec::new());
        info!(group_id = %group.id, name = %group.name, "created Scaleway security group");
        Ok(group)
    }

    pub(super) async fn create_rule(
        &self,
        group_id: &str,
        rule: &IngressRule,
    ) -> Result<(), DriverError> {
        let RemoteRef::IpPrefix(ip_range) = &rule.remote else {
            return Err(DriverError::unsupported(
                super::FAMILY,
                "rules referencing another security group",
            ));
        };
        let payload = CreateRulePayload {
            protocol: rule.protocol.to_ascii_uppercase(),
            direction: "inbound",
            action: "accept",
            ip_range,
            dest_port_from: rule.port_range_min,
            dest_port_to: (rule.port_range_max != rule.port_range_min)
                .then_some(rule.port_range_max),
        };
        Self::send_empty(
            self.request(Method::POST, &format!("security_groups/{group_id}/rules"))
                .json(&payload),
        )
        .await
    }

    pub(super) async fn delete_group(&self, id: &str) -> Result<(), DriverError> {
        Self::send_empty(self.request(Method::DELETE, &format!("security_groups/{id}"))).await
    }
}
