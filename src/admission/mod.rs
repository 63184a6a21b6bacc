//! Admission decisions for workload creation requests.
//!
//! The [`AdmissionController`] is the entry point: it bypasses critical
//! namespaces, selects managed-registry images, runs the batch engine under
//! a deadline and shapes the outcome into an [`AdmissionDecision`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use tracing::{error, info, warn};

use crate::compliance::{
    BatchComplianceEngine, EvaluationError, RepositoryPolicyEvaluator, Verdict,
};
use crate::config::Config;
use crate::registry::ecr::EcrClient;
use crate::registry::filter::RegistryFilter;
use crate::registry::RegistryApi;

/// Message returned when every managed image is compliant.
pub const PASS_MESSAGE: &str = "workload contains compliant ecr repositories";

/// Message prefix for a compliance denial.
pub const FAILED_COMPLIANCE: &str = "webhook: repository fails ecr criteria";

/// Message returned when a workload references no managed image.
pub const IMAGES_NOT_FOUND: &str = "webhook: no ecr images found in workload specification";

/// Message prefix for a hard error.
pub const COULD_NOT_EVALUATE: &str = "webhook: could not evaluate compliance";

/// The parts of a decoded workload the policy reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    /// Namespace the workload is created in.
    pub namespace: String,
    /// Images of every container, then every init container.
    pub images: Vec<String>,
}

/// Allow/deny outcome for one admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the workload may be created.
    pub allowed: bool,
    /// HTTP-style status code carried in the admission status.
    pub status_code: u16,
    /// Human-readable explanation.
    pub message: String,
}

impl AdmissionDecision {
    /// Shape an engine outcome into a decision.
    ///
    /// Hard errors map to a server error, a non-compliant verdict to
    /// `406 Not Acceptable` listing every failure reason, and a compliant
    /// verdict to success.
    pub fn decide(outcome: &Result<Verdict, EvaluationError>) -> Self {
        match outcome {
            Err(e) => Self::hard_error(e),
            Ok(verdict) if verdict.compliant => Self::pass(),
            Ok(verdict) => Self::not_compliant(verdict),
        }
    }

    /// Workload allowed.
    pub fn pass() -> Self {
        Self {
            allowed: true,
            status_code: StatusCode::OK.as_u16(),
            message: PASS_MESSAGE.to_owned(),
        }
    }

    /// Workload allowed without evaluation because of its namespace.
    pub fn critical_namespace(namespace: &str) -> Self {
        Self {
            allowed: true,
            status_code: StatusCode::OK.as_u16(),
            message: format!("workload is in critical namespace '{namespace}', skipping checks"),
        }
    }

    /// Workload denied because at least one image failed compliance.
    pub fn not_compliant(verdict: &Verdict) -> Self {
        let reasons = verdict
            .failures()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let message = if reasons.is_empty() {
            FAILED_COMPLIANCE.to_owned()
        } else {
            format!("{FAILED_COMPLIANCE}: {}", reasons.join("; "))
        };
        Self {
            allowed: false,
            status_code: StatusCode::NOT_ACCEPTABLE.as_u16(),
            message,
        }
    }

    /// Workload denied because it references no managed-registry image.
    pub fn no_managed_images() -> Self {
        Self {
            allowed: false,
            status_code: StatusCode::NOT_ACCEPTABLE.as_u16(),
            message: IMAGES_NOT_FOUND.to_owned(),
        }
    }

    /// Workload denied because compliance could not be determined.
    pub fn hard_error(err: &EvaluationError) -> Self {
        Self {
            allowed: false,
            status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: format!("{COULD_NOT_EVALUATE}: {err}"),
        }
    }

    /// Request denied because it could not be decoded.
    pub fn bad_request(detail: impl std::fmt::Display) -> Self {
        Self {
            allowed: false,
            status_code: StatusCode::BAD_REQUEST.as_u16(),
            message: detail.to_string(),
        }
    }
}

/// Applies the registry compliance policy to workloads.
#[derive(Clone)]
pub struct AdmissionController {
    filter: RegistryFilter,
    engine: BatchComplianceEngine,
    critical_namespaces: Vec<String>,
    timeout: Option<Duration>,
}

impl AdmissionController {
    /// Assemble a controller from its parts.
    pub fn new(
        filter: RegistryFilter,
        engine: BatchComplianceEngine,
        critical_namespaces: Vec<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            filter,
            engine,
            critical_namespaces,
            timeout,
        }
    }

    /// Build a controller backed by an [`EcrClient`] from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the HTTP client or
    /// registry filter cannot be built.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = EcrClient::new(config.registry.client_config()?)
            .context("failed to build registry client")?;
        Self::with_registry(config, Arc::new(client))
    }

    /// Build a controller from configuration around an existing registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry filter cannot be built.
    pub fn with_registry(config: &Config, registry: Arc<dyn RegistryApi>) -> anyhow::Result<Self> {
        let filter = RegistryFilter::with_allowed_accounts(config.registry.allowed_accounts.clone())
            .context("failed to compile managed registry pattern")?;
        let engine = BatchComplianceEngine::new(
            RepositoryPolicyEvaluator::new(registry),
            config.evaluation.max_concurrent_evaluations,
        );
        Ok(Self::new(
            filter,
            engine,
            config.admission.critical_namespaces.clone(),
            Some(Duration::from_secs(config.evaluation.timeout_secs)),
        ))
    }

    /// The registry filter in use.
    pub fn filter(&self) -> &RegistryFilter {
        &self.filter
    }

    /// Whether `namespace` bypasses evaluation.
    pub fn is_critical_namespace(&self, namespace: &str) -> bool {
        self.critical_namespaces.iter().any(|n| n == namespace)
    }

    /// Run the batch engine over already-filtered images, under the deadline.
    ///
    /// # Errors
    ///
    /// Returns the engine's hard error, or [`EvaluationError::TimedOut`].
    pub async fn evaluate(&self, images: &[String]) -> Result<Verdict, EvaluationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.engine.evaluate_all(images))
                .await
                .unwrap_or(Err(EvaluationError::TimedOut(limit))),
            None => self.engine.evaluate_all(images).await,
        }
    }

    /// Decide whether `workload` may be created.
    pub async fn admit(&self, workload: &Workload) -> AdmissionDecision {
        if self.is_critical_namespace(&workload.namespace) {
            info!(namespace = %workload.namespace, "workload in critical namespace, passing");
            return AdmissionDecision::critical_namespace(&workload.namespace);
        }

        let images = self.filter.filter(&workload.images);
        if images.is_empty() {
            warn!(namespace = %workload.namespace, "no managed registry images in workload");
            return AdmissionDecision::no_managed_images();
        }

        let outcome = self.evaluate(&images).await;
        match &outcome {
            Err(e) => error!(error = %e, "error during compliance check"),
            Ok(verdict) if !verdict.compliant => {
                warn!(images = images.len(), "workload is not compliant");
            }
            Ok(_) => {}
        }

        let decision = AdmissionDecision::decide(&outcome);
        info!(
            allowed = decision.allowed,
            code = decision.status_code,
            message = %decision.message,
            "admission decision"
        );
        decision
    }
}
