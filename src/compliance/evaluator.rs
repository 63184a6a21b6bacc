//! Per-image repository policy evaluation.

use std::sync::Arc;

use tracing::debug;

use super::{ComplianceFailure, ComplianceResult, EvaluationError, VulnerabilityScanner};
use crate::image::ImageReference;
use crate::registry::RegistryApi;

/// Evaluates one image against the repository compliance policy.
///
/// Checks run cheapest first and stop at the first failure:
/// 1. the image reference parses
/// 2. the repository exists
/// 3. tag immutability is enabled
/// 4. scan on push is enabled
/// 5. the scan has no critical finding
#[derive(Clone)]
pub struct RepositoryPolicyEvaluator {
    registry: Arc<dyn RegistryApi>,
    scanner: VulnerabilityScanner,
}

impl RepositoryPolicyEvaluator {
    /// Create an evaluator backed by `registry`.
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        let scanner = VulnerabilityScanner::new(Arc::clone(&registry));
        Self { registry, scanner }
    }

    /// Evaluate one `repository:tag` or `repository@digest` image.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] when a registry call fails; policy
    /// failures are reported in the returned [`ComplianceResult`] instead.
    pub async fn evaluate(&self, image: &str) -> Result<ComplianceResult, EvaluationError> {
        let reference = match ImageReference::parse(image) {
            Ok(reference) => reference,
            Err(e) => {
                debug!(image, error = %e, "unparseable image reference");
                return Ok(ComplianceResult::fail(
                    image,
                    ComplianceFailure::Unparseable {
                        image: image.to_owned(),
                    },
                ));
            }
        };
        let repository = reference.repository.clone();

        let snapshot = self
            .registry
            .describe_repository(&repository)
            .await
            .map_err(|source| EvaluationError::Registry {
                image: image.to_owned(),
                source,
            })?;

        let Some(snapshot) = snapshot else {
            debug!(image, repository = %repository, "repository not found");
            return Ok(ComplianceResult::fail(
                image,
                ComplianceFailure::RepositoryNotFound { repository },
            ));
        };

        if !snapshot.tag_immutable {
            debug!(image, repository = %repository, "tag immutability disabled");
            return Ok(ComplianceResult::fail(
                image,
                ComplianceFailure::ImmutabilityDisabled { repository },
            ));
        }

        if !snapshot.scan_on_push {
            debug!(image, repository = %repository, "scan on push disabled");
            return Ok(ComplianceResult::fail(
                image,
                ComplianceFailure::ScanningDisabled { repository },
            ));
        }

        if self.scanner.has_critical(&reference).await? {
            return Ok(ComplianceResult::fail(
                image,
                ComplianceFailure::CriticalVulnerability {
                    image: image.to_owned(),
                },
            ));
        }

        debug!(image, repository = %repository, "image is compliant");
        Ok(ComplianceResult::pass(image))
    }
}
