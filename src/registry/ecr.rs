//! ECR implementation of [`RegistryApi`] over the JSON 1.1 protocol.
//!
//! Requests are `POST`ed to the configured endpoint with an
//! `X-Amz-Target` header naming the operation. Request signing is not done
//! here; point the endpoint at a signing proxy when talking to AWS directly.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::{
    sanitize_error_body, FindingPages, ImageId, RegistryApi, RegistryError,
    RepositoryPolicySnapshot, ScanFinding, Severity,
};

const TARGET_HEADER: &str = "x-amz-target";
const TARGET_PREFIX: &str = "AmazonEC2ContainerRegistry_V20150921";
const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Error type ECR returns for an unknown repository name.
pub const REPOSITORY_NOT_FOUND: &str = "RepositoryNotFoundException";

/// Largest page size `DescribeImageScanFindings` accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// `DescribeRepositories` request body.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRepositoriesRequest {
    /// Repositories to describe.
    pub repository_names: Vec<String>,
    /// Registry (account) id; defaults to the caller's registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
}

/// `DescribeRepositories` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRepositoriesResponse {
    /// Matching repositories.
    #[serde(default)]
    pub repositories: Vec<EcrRepository>,
}

/// A repository as returned by ECR.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrRepository {
    /// Repository name.
    pub repository_name: String,
    /// `MUTABLE`, `IMMUTABLE` or an `IMMUTABLE_WITH_*` variant.
    #[serde(default)]
    pub image_tag_mutability: Option<String>,
    /// Scan configuration.
    #[serde(default)]
    pub image_scanning_configuration: Option<EcrScanningConfiguration>,
}

/// Repository scan configuration.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrScanningConfiguration {
    /// Whether pushes trigger a scan.
    #[serde(default)]
    pub scan_on_push: bool,
}

/// `DescribeImageScanFindings` request body.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeImageScanFindingsRequest {
    /// Repository holding the image.
    pub repository_name: String,
    /// Image selector.
    pub image_id: EcrImageId,
    /// Registry (account) id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    /// Page size.
    pub max_results: u32,
    /// Continuation token from the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Image selector; exactly one field is set.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrImageId {
    /// Image tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    /// Image digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
}

/// `DescribeImageScanFindings` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeImageScanFindingsResponse {
    /// Findings on this page.
    #[serde(default)]
    pub image_scan_findings: Option<EcrImageScanFindings>,
    /// Token for the next page; absent on the last page.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Basic and enhanced scan findings.
#[doc(hidden)]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrImageScanFindings {
    /// Basic scanning findings.
    #[serde(default)]
    pub findings: Vec<EcrFinding>,
    /// Enhanced scanning findings.
    #[serde(default)]
    pub enhanced_findings: Vec<EcrFinding>,
}

/// A single finding; only severity is read.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct EcrFinding {
    /// Severity label.
    #[serde(default)]
    pub severity: Option<String>,
}

/// Error body returned with non-2xx responses.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct EcrErrorBody {
    /// Error type, optionally namespaced (`com.amazonaws.ecr#...`).
    #[serde(rename = "__type")]
    pub error_type: String,
    /// Error message.
    #[serde(default, alias = "Message")]
    pub message: String,
}

/// One parsed page of scan findings.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingsPage {
    /// Findings on this page.
    pub findings: Vec<ScanFinding>,
    /// Continuation token, `None` on the last page.
    pub next_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build the image selector for a scan-finding query.
#[doc(hidden)]
pub fn build_image_id(image: &ImageId) -> EcrImageId {
    match image {
        ImageId::Tag(tag) => EcrImageId {
            image_tag: Some(tag.clone()),
            image_digest: None,
        },
        ImageId::Digest(digest) => EcrImageId {
            image_tag: None,
            image_digest: Some(digest.clone()),
        },
    }
}

/// Parse a `DescribeRepositories` response into a policy snapshot.
///
/// # Errors
///
/// Returns `RegistryError::Parse` if the body cannot be deserialized.
#[doc(hidden)]
pub fn parse_repository_response(
    body: &str,
) -> Result<Option<RepositoryPolicySnapshot>, RegistryError> {
    let resp: DescribeRepositoriesResponse =
        serde_json::from_str(body).map_err(|e| RegistryError::Parse(e.to_string()))?;

    Ok(resp.repositories.into_iter().next().map(|repo| {
        let tag_immutable = repo
            .image_tag_mutability
            .as_deref()
            .is_some_and(|m| m.starts_with("IMMUTABLE"));
        let scan_on_push = repo
            .image_scanning_configuration
            .is_some_and(|c| c.scan_on_push);
        RepositoryPolicySnapshot {
            name: repo.repository_name,
            tag_immutable,
            scan_on_push,
        }
    }))
}

/// Parse one `DescribeImageScanFindings` page.
///
/// # Errors
///
/// Returns `RegistryError::Parse` if the body cannot be deserialized.
#[doc(hidden)]
pub fn parse_findings_page(body: &str) -> Result<FindingsPage, RegistryError> {
    let resp: DescribeImageScanFindingsResponse =
        serde_json::from_str(body).map_err(|e| RegistryError::Parse(e.to_string()))?;

    let scan = resp.image_scan_findings.unwrap_or_default();
    let findings = scan
        .findings
        .iter()
        .chain(scan.enhanced_findings.iter())
        .map(|f| ScanFinding {
            severity: f
                .severity
                .as_deref()
                .map_or(Severity::Undefined, Severity::from_label),
        })
        .collect();

    Ok(FindingsPage {
        findings,
        next_token: resp.next_token.filter(|t| !t.is_empty()),
    })
}

/// Turn a non-2xx response into a [`RegistryError`].
///
/// Typed ECR errors become `RegistryError::Api` with the bare error name;
/// anything else keeps the status and a sanitised body.
#[doc(hidden)]
pub fn classify_error(status: u16, body: &str) -> RegistryError {
    match serde_json::from_str::<EcrErrorBody>(body) {
        Ok(err) => {
            let code = err
                .error_type
                .rsplit('#')
                .next()
                .unwrap_or_default()
                .to_owned();
            RegistryError::Api {
                code,
                message: sanitize_error_body(&err.message),
            }
        }
        Err(_) => RegistryError::HttpStatus {
            status,
            body: sanitize_error_body(body),
        },
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection settings for [`EcrClient`].
#[derive(Debug, Clone)]
pub struct EcrClientConfig {
    /// API endpoint, e.g. a SigV4 signing proxy in front of
    /// `https://api.ecr.us-east-1.amazonaws.com`, or a local emulator.
    ///
    /// Requests are sent unsigned. Pointed straight at `api.ecr.*`, every
    /// call is rejected with `403`, which surfaces as a [`RegistryError`]
    /// and fails admission with a `500` hard error.
    pub endpoint: Url,
    /// Registry (account) id; `None` uses the caller's default registry.
    pub registry_id: Option<String>,
    /// Findings requested per page (1..=1000).
    pub page_size: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// ECR JSON API client.
#[derive(Debug, Clone)]
pub struct EcrClient {
    endpoint: Url,
    registry_id: Option<String>,
    page_size: u32,
    client: reqwest::Client,
}

impl EcrClient {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Request` if the HTTP client cannot be built.
    pub fn new(config: EcrClientConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            endpoint: config.endpoint,
            registry_id: config.registry_id,
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            client,
        })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T: Serialize + Sync>(
        &self,
        operation: &str,
        body: &T,
    ) -> Result<String, RegistryError> {
        let payload = serde_json::to_vec(body).map_err(|e| RegistryError::Parse(e.to_string()))?;
        trace!(operation, endpoint = %self.endpoint, "sending registry request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)
            .header(TARGET_HEADER, format!("{TARGET_PREFIX}.{operation}"))
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }
        Ok(text)
    }
}

/// Lazy pager over `DescribeImageScanFindings`.
struct EcrFindingPages {
    client: EcrClient,
    request: DescribeImageScanFindingsRequest,
    exhausted: bool,
}

#[async_trait]
impl FindingPages for EcrFindingPages {
    async fn next_page(&mut self) -> Result<Option<Vec<ScanFinding>>, RegistryError> {
        if self.exhausted {
            return Ok(None);
        }
        let body = self
            .client
            .call("DescribeImageScanFindings", &self.request)
            .await?;
        let page = parse_findings_page(&body)?;

        self.exhausted = page.next_token.is_none();
        self.request.next_token = page.next_token;
        Ok(Some(page.findings))
    }
}

#[async_trait]
impl RegistryApi for EcrClient {
    async fn describe_repository(
        &self,
        name: &str,
    ) -> Result<Option<RepositoryPolicySnapshot>, RegistryError> {
        let request = DescribeRepositoriesRequest {
            repository_names: vec![name.to_owned()],
            registry_id: self.registry_id.clone(),
        };
        match self.call("DescribeRepositories", &request).await {
            Ok(body) => parse_repository_response(&body),
            Err(RegistryError::Api { code, .. }) if code == REPOSITORY_NOT_FOUND => {
                debug!(repository = name, "registry reports no such repository");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn scan_findings(
        &self,
        repository: &str,
        image: &ImageId,
    ) -> Result<Box<dyn FindingPages>, RegistryError> {
        Ok(Box::new(EcrFindingPages {
            client: self.clone(),
            request: DescribeImageScanFindingsRequest {
                repository_name: repository.to_owned(),
                image_id: build_image_id(image),
                registry_id: self.registry_id.clone(),
                max_results: self.page_size,
                next_token: None,
            },
            exhausted: false,
        }))
    }
}
