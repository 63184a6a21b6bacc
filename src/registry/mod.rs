//! Managed-registry abstraction layer.
//!
//! Defines the [`RegistryApi`] trait through which the compliance engine
//! reads repository configuration and vulnerability scan findings, plus the
//! data types exchanged over it.
//!
//! - [`filter::RegistryFilter`] decides which workload images come from the
//!   managed registry.
//! - [`ecr::EcrClient`] implements [`RegistryApi`] against the ECR JSON API.

use std::fmt;

use async_trait::async_trait;

use crate::image::TagOrDigest;

pub mod ecr;
pub mod filter;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Point-in-time read of a repository's compliance-relevant settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPolicySnapshot {
    /// Repository name.
    pub name: String,
    /// Whether tags can no longer be overwritten once pushed.
    pub tag_immutable: bool,
    /// Whether every push triggers a vulnerability scan.
    pub scan_on_push: bool,
}

/// Severity of a scan finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Severity not reported or not yet triaged.
    Undefined,
    /// Informational only.
    Informational,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity; any such finding fails compliance.
    Critical,
}

impl Severity {
    /// Map a registry severity label. Unknown labels become [`Severity::Undefined`].
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "INFORMATIONAL" => Self::Informational,
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Undefined,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Undefined => "UNDEFINED",
            Self::Informational => "INFORMATIONAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// One vulnerability scan finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFinding {
    /// Finding severity.
    pub severity: Severity,
}

/// Identifies one image inside a repository for a scan-finding query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageId {
    /// Select by tag.
    Tag(String),
    /// Select by digest (`sha256:...`).
    Digest(String),
}

impl From<&TagOrDigest> for ImageId {
    fn from(value: &TagOrDigest) -> Self {
        match value {
            TagOrDigest::Tag(tag) => Self::Tag(tag.clone()),
            TagOrDigest::Digest(digest) => Self::Digest(digest.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by registry API implementations.
///
/// Every variant is a hard error: the query could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// HTTP transport failure.
    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Registry responded with a non-success status and no recognised error body.
    #[error("registry returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },
    /// Registry returned a typed API error.
    #[error("registry api error {code}: {message}")]
    Api {
        /// Error type, e.g. `ScanNotFoundException`.
        code: String,
        /// Error message.
        message: String,
    },
    /// Response did not match the expected schema.
    #[error("registry response parse error: {0}")]
    Parse(String),
    /// Registry could not be reached with the current configuration.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Lazy, finite, non-restartable sequence of scan-finding pages.
///
/// Each call to [`FindingPages::next_page`] may perform one remote request.
/// Consumers are free to stop after any page; dropping the pager requests
/// nothing further.
#[async_trait]
pub trait FindingPages: Send {
    /// Fetch the next page, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the page request fails.
    async fn next_page(&mut self) -> Result<Option<Vec<ScanFinding>>, RegistryError>;
}

/// Read-only view of the managed registry used by the compliance engine.
///
/// Implementations must be `Send + Sync` so one client can serve every
/// concurrent evaluation task of a request.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Look up one repository by name.
    ///
    /// Returns `Ok(None)` when the registry has no such repository; that is a
    /// compliance outcome, not a transport failure.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the lookup cannot be completed.
    async fn describe_repository(
        &self,
        name: &str,
    ) -> Result<Option<RepositoryPolicySnapshot>, RegistryError>;

    /// Open a paginated scan-finding query for one image.
    ///
    /// Opening the query must not fetch anything; pages are requested lazily.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the query cannot be prepared.
    async fn scan_findings(
        &self,
        repository: &str,
        image: &ImageId,
    ) -> Result<Box<dyn FindingPages>, RegistryError>;
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Collapse whitespace and truncate an error body before it is embedded in
/// an error message or log line.
pub(crate) fn sanitize_error_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 256;

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = collapsed
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}
