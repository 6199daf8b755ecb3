//! Image and commercial type resolution.

use reqwest::Method;
use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::driver::{DriverError, SizeSelector};

use super::ScalewayDriver;
use super::http::PER_PAGE;
use super::types::ProductList;

const BYTES_PER_MB: u64 = 1024 * 1024;

impl ScalewayDriver {
    pub(super) async fn resolve_image_id(&self, name: &str) -> Result<Option<String>, DriverError> {
        let images = ScalewayListInstanceImagesBuilder::new(self.api.clone(), self.zone.as_str())
            .public(true)
            .name(name)
            .arch(&self.architecture)
            .run_async()
            .await?;
        Ok(select_image_id(images, name, &self.architecture))
    }

    pub(super) async fn resolve_commercial_type(
        &self,
        selector: &SizeSelector,
    ) -> Result<Option<String>, DriverError> {
        let request = self
            .request(Method::GET, "products/servers")
            .query(&[("per_page", PER_PAGE)]);
        let products: ProductList = Self::send_json(request).await?;
        Ok(select_commercial_type(products, selector))
    }
}

/// Picks the newest available image for `arch`, preferring exact name
/// matches over the API's substring matches.
pub(super) fn select_image_id(images: Vec<ScalewayImage>, name: &str, arch: &str) -> Option<String> {
    let mut candidates: Vec<ScalewayImage> = images
        .into_iter()
        .filter(|image| image.arch == arch)
        .filter(|image| image.state == "available")
        .collect();
    if candidates.iter().any(|image| image.name == name) {
        candidates.retain(|image| image.name == name);
    }
    candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
    candidates.into_iter().next().map(|image| image.id)
}

/// Resolves a size selector against the zone's product catalogue.
///
/// RAM selection picks the type with exactly that much memory and the
/// fewest vCPUs.
pub(super) fn select_commercial_type(
    products: ProductList,
    selector: &SizeSelector,
) -> Option<String> {
    match selector {
        SizeSelector::Named(name) => products.servers.contains_key(name).then(|| name.clone()),
        SizeSelector::Ram(megabytes) => {
            let wanted = u64::from(*megabytes) * BYTES_PER_MB;
            products
                .servers
                .into_iter()
                .filter(|(_, product)| product.ram == wanted)
                .min_by_key(|(_, product)| product.ncpus)
                .map(|(commercial_type, _)| commercial_type)
        }
    }
}
