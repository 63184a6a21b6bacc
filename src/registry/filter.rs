//! Managed-registry image selection.
//!
//! Workloads may reference images from any registry. Only images hosted in
//! the managed registry are subject to compliance checks; everything else is
//! dropped silently.
//!
//! Managed hosts follow the ECR grammar:
//! `<account>.dkr.ecr[-fips].<region>.amazonaws.com[.cn]`.

use regex::Regex;

use crate::image::{ImageReference, NotParseable};
use tracing::{debug, trace};

/// Host grammar for the managed registry, anchored on the host segment.
///
/// Capture 1 is the account id or alias, capture 3 the region.
pub const MANAGED_HOST_PATTERN: &str =
    r"^([a-zA-Z0-9][a-zA-Z0-9-_]*)\.dkr\.(ecr|ecr-fips)\.([a-z][a-z0-9-_]*)\.amazonaws\.com(\.cn)?$";

/// Selects and de-duplicates managed-registry images from a workload.
#[derive(Debug, Clone)]
pub struct RegistryFilter {
    host: Regex,
    allowed_accounts: Vec<String>,
}

impl RegistryFilter {
    /// Build a filter accepting any account in the managed registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the host pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_allowed_accounts(Vec::new())
    }

    /// Build a filter restricted to the given account ids or aliases.
    ///
    /// An empty list accepts every account.
    ///
    /// # Errors
    ///
    /// Returns an error if the host pattern fails to compile.
    pub fn with_allowed_accounts(allowed_accounts: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            host: Regex::new(MANAGED_HOST_PATTERN)?,
            allowed_accounts,
        })
    }

    /// Whether `host` names the managed registry (and an allowed account).
    pub fn is_managed_host(&self, host: &str) -> bool {
        let Some(captures) = self.host.captures(host) else {
            return false;
        };
        if self.allowed_accounts.is_empty() {
            return true;
        }
        captures
            .get(1)
            .is_some_and(|account| self.allowed_accounts.iter().any(|a| a == account.as_str()))
    }

    /// Strip the managed host from `image`, leaving `repository:tag` or
    /// `repository@digest`.
    ///
    /// Returns `None` for images without a host segment, with an empty
    /// remainder, or hosted elsewhere.
    pub fn managed_path(&self, image: &str) -> Option<String> {
        let (host, path) = image.split_once('/')?;
        if path.is_empty() || !self.is_managed_host(host) {
            return None;
        }
        Some(path.to_owned())
    }

    /// Parse a managed image, keeping the stripped host as its registry.
    ///
    /// Returns `None` where [`RegistryFilter::managed_path`] does.
    pub fn reference(&self, image: &str) -> Option<Result<ImageReference, NotParseable>> {
        let path = self.managed_path(image)?;
        let host = image.split_once('/').map_or("", |(host, _)| host);
        Some(ImageReference::parse(&path).map(|reference| ImageReference {
            registry: host.to_owned(),
            ..reference
        }))
    }

    /// Select the managed-registry images, in first-seen order, without duplicates.
    pub fn filter<I, S>(&self, images: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected: Vec<String> = Vec::new();
        for image in images {
            let image = image.as_ref();
            match self.managed_path(image) {
                Some(path) if !selected.contains(&path) => {
                    trace!(image, path = %path, "selected managed image");
                    selected.push(path);
                }
                Some(_) => trace!(image, "skipping duplicate image"),
                None => debug!(image, "image is not from the managed registry"),
            }
        }
        selected
    }
}
