//! Critical-finding detection over paginated scan results.

use std::sync::Arc;

use tracing::debug;

use super::EvaluationError;
use crate::image::ImageReference;
use crate::registry::{ImageId, RegistryApi, Severity};

/// Looks for critical findings in an image's vulnerability scan.
#[derive(Clone)]
pub struct VulnerabilityScanner {
    registry: Arc<dyn RegistryApi>,
}

impl VulnerabilityScanner {
    /// Create a scanner backed by `registry`.
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        Self { registry }
    }

    /// Whether the scan of `reference` has at least one critical finding.
    ///
    /// Pages are consumed lazily and no further page is requested once a
    /// critical finding is seen.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidReference`] for a reference with an
    /// empty tag or digest, and [`EvaluationError::Registry`] when any page
    /// request fails.
    pub async fn has_critical(&self, reference: &ImageReference) -> Result<bool, EvaluationError> {
        if !reference.tag_or_digest.is_set() {
            return Err(EvaluationError::InvalidReference {
                repository: reference.repository.clone(),
            });
        }

        let registry_err = |source| EvaluationError::Registry {
            image: reference.to_string(),
            source,
        };

        let image_id = ImageId::from(&reference.tag_or_digest);
        let mut pages = self
            .registry
            .scan_findings(&reference.repository, &image_id)
            .await
            .map_err(registry_err)?;

        let mut pages_read: usize = 0;
        while let Some(findings) = pages.next_page().await.map_err(registry_err)? {
            pages_read = pages_read.saturating_add(1);
            if findings.iter().any(|f| f.severity == Severity::Critical) {
                debug!(image = %reference, pages_read, "critical finding found, stopping scan");
                return Ok(true);
            }
        }

        debug!(image = %reference, pages_read, "no critical findings");
        Ok(false)
    }
}
