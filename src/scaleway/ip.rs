//! Flexible IP allocation and routing.

use reqwest::Method;
use serde_json::json;
use tracing::info;

use crate::driver::{DriverError, FloatingIp};

use super::ScalewayDriver;
use super::types::{IpEnvelope, IpList, RouteIpPayload};

impl ScalewayDriver {
    pub(super) async fn create_ip(&self) -> Result<FloatingIp, DriverError> {
        let created: IpEnvelope = self
            .send_payload(Method::POST, "ips", &json!({ "project": self.project_id }))
            .await?;
        let ip = FloatingIp::from(created.ip);
        info!(ip_id = %ip.id, address = %ip.address, "allocated Scaleway flexible IP");
        Ok(ip)
    }

    pub(super) async fn lookup_ip(&self, address: &str) -> Result<Option<FloatingIp>, DriverError> {
        let ips = self
            .list_all(
                "ips",
                &[("project", self.project_id.as_str())],
                |listing: IpList| listing.ips,
            )
            .await?;
        Ok(ips
            .into_iter()
            .find(|ip| ip.address == address)
            .map(FloatingIp::from))
    }

    pub(super) async fn delete_ip(&self, ip: &FloatingIp) -> Result<(), DriverError> {
        Self::send_empty(self.request(Method::DELETE, &format!("ips/{}", ip.id))).await
    }

    /// Routes the IP to `server_id`, or detaches it when `None`.
    pub(super) async fn route_ip(
        &self,
        ip: &FloatingIp,
        server_id: Option<&str>,
    ) -> Result<(), DriverError> {
        let payload = RouteIpPayload { server: server_id };
        Self::send_empty(
            self.request(Method::PATCH, &format!("ips/{}", ip.id))
                .json(&payload),
        )
        .await
    }
}
