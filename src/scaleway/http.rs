//! Raw JSON calls for Instances API endpoints `scaleway-rs` does not wrap.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::driver::DriverError;

use super::ScalewayDriver;
use super::error::{from_response, transport};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Page size requested from list endpoints.
pub(super) const PER_PAGE: &str = "100";
const PER_PAGE_ITEMS: usize = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

impl ScalewayDriver {
    /// Zone-scoped endpoint URL, for example `.../zones/fr-par-1/ips`.
    pub(super) fn endpoint(&self, path: &str) -> String {
        format!("{}/zones/{}/{path}", self.base_url, self.zone.as_str())
    }

    pub(super) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        HTTP_CLIENT
            .request(method, self.endpoint(path))
            .header("X-Auth-Token", &self.secret_key)
    }

    async fn execute(request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), DriverError> {
        let response = request.send().await.map_err(|err| transport(&err))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| transport(&err))?;
        Ok((status, body.to_vec()))
    }

    /// Sends a request and decodes the JSON response body.
    pub(super) async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
    ) -> Result<T, DriverError> {
        let (status, body) = Self::execute(request).await?;
        if !status.is_success() {
            return Err(from_response(status.as_u16(), &body));
        }
        serde_json::from_slice(&body).map_err(|err| DriverError::Decode {
            message: err.to_string(),
        })
    }

    /// Sends a request whose response body is irrelevant.
    pub(super) async fn send_empty(request: RequestBuilder) -> Result<(), DriverError> {
        let (status, body) = Self::execute(request).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(from_response(status.as_u16(), &body))
    }

    /// GETs a single resource, mapping 404 to `None`.
    pub(super) async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, DriverError> {
        Self::send_json(self.request(Method::GET, path))
            .await
            .map(Some)
            .or_else(|err| match err {
                DriverError::Api { status: 404, .. } => Ok(None),
                other => Err(other),
            })
    }

    /// GETs every page of a list endpoint. `items` extracts one page's
    /// entries from its envelope; a short page ends the listing.
    pub(super) async fn list_all<L, T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        items: fn(L) -> Vec<T>,
    ) -> Result<Vec<T>, DriverError>
    where
        L: DeserializeOwned + Send,
        T: Send,
    {
        let mut collected = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_number = page.to_string();
            let request = self
                .request(Method::GET, path)
                .query(query)
                .query(&[("page", page_number.as_str()), ("per_page", PER_PAGE)]);
            let batch = items(Self::send_json::<L>(request).await?);
            let last = batch.len() < PER_PAGE_ITEMS;
            collected.extend(batch);
            if last {
                return Ok(collected);
            }
            page = page.saturating_add(1);
        }
    }

    /// POSTs or PATCHes a JSON payload and decodes the response.
    pub(super) async fn send_payload<P: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: &P,
    ) -> Result<T, DriverError> {
        Self::send_json(self.request(method, path).json(payload)).await
    }
}
