//! Repository compliance evaluation.
//!
//! An image is compliant when its repository exists in the managed registry,
//! has tag immutability and scan-on-push enabled, and its scan reports no
//! critical finding.
//!
//! Outcomes come in two kinds:
//! - [`ComplianceFailure`]: the image was checked and failed. Recorded in a
//!   [`ComplianceResult`]; never stops evaluation of other images.
//! - [`EvaluationError`]: the check could not be completed. Aborts the whole
//!   batch.

use std::time::Duration;

use crate::registry::RegistryError;

pub mod batch;
pub mod evaluator;
pub mod scanner;

pub use batch::BatchComplianceEngine;
pub use evaluator::RepositoryPolicyEvaluator;
pub use scanner::VulnerabilityScanner;

/// Why an image failed compliance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComplianceFailure {
    /// The image string is not a valid reference.
    #[error("image '{image}' is not a valid image reference")]
    Unparseable {
        /// The rejected image string.
        image: String,
    },
    /// The registry has no repository with this name.
    #[error("no repositories named '{repository}' found")]
    RepositoryNotFound {
        /// Repository name.
        repository: String,
    },
    /// Tags in the repository can be overwritten.
    #[error("repository '{repository}' does not have image tag immutability enabled")]
    ImmutabilityDisabled {
        /// Repository name.
        repository: String,
    },
    /// Pushes to the repository are not scanned.
    #[error("repository '{repository}' does not have image scan on push enabled")]
    ScanningDisabled {
        /// Repository name.
        repository: String,
    },
    /// The image scan reported at least one critical finding.
    #[error("image '{image}' contains CRITICAL vulnerabilities")]
    CriticalVulnerability {
        /// The offending image.
        image: String,
    },
}

/// Hard errors: compliance could not be determined.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A reference reached the scanner with an empty tag or digest.
    #[error("image reference for repository '{repository}' has neither tag nor digest")]
    InvalidReference {
        /// Repository of the invalid reference.
        repository: String,
    },
    /// A registry call failed.
    #[error("registry query for '{image}' failed: {source}")]
    Registry {
        /// Image being evaluated.
        image: String,
        /// Underlying registry failure.
        #[source]
        source: RegistryError,
    },
    /// An evaluation task panicked or was aborted unexpectedly.
    #[error("evaluation task failed: {0}")]
    TaskFailed(String),
    /// The batch did not finish before its deadline.
    #[error("compliance evaluation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outcome for one image. Only produced when evaluation completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceResult {
    /// The image as given to the evaluator.
    pub image: String,
    /// Whether the image passed every check.
    pub compliant: bool,
    /// Failure reason; `None` exactly when `compliant` is true.
    pub reason: Option<ComplianceFailure>,
}

impl ComplianceResult {
    /// A passing result.
    pub fn pass(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            compliant: true,
            reason: None,
        }
    }

    /// A failing result with its reason.
    pub fn fail(image: impl Into<String>, reason: ComplianceFailure) -> Self {
        Self {
            image: image.into(),
            compliant: false,
            reason: Some(reason),
        }
    }
}

/// Aggregate over every image of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// True iff every result is compliant. Vacuously true for no images.
    pub compliant: bool,
    /// Per-image results in input order.
    pub results: Vec<ComplianceResult>,
}

impl Verdict {
    /// Aggregate per-image results.
    pub fn from_results(results: Vec<ComplianceResult>) -> Self {
        let compliant = results.iter().all(|r| r.compliant);
        Self { compliant, results }
    }

    /// Failure reasons, in input order.
    pub fn failures(&self) -> impl Iterator<Item = &ComplianceFailure> {
        self.results.iter().filter_map(|r| r.reason.as_ref())
    }
}
