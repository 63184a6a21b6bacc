//! Validating webhook boundary: `AdmissionReview` in, `AdmissionReview` out.
//!
//! Workload objects are decoded through a [`WorkloadDecoders`] registry that
//! the caller builds once and hands to [`Webhook::new`]; there is no global
//! type registry.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::admission::{AdmissionController, AdmissionDecision, Workload};

/// `apiVersion` used when a review does not carry one.
pub const DEFAULT_API_VERSION: &str = "admission.k8s.io/v1";

/// `kind` of every review document.
pub const REVIEW_KIND: &str = "AdmissionReview";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// An `AdmissionReview` document, request or response side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// `admission.k8s.io/v1` or `admission.k8s.io/v1beta1`.
    #[serde(default)]
    pub api_version: String,
    /// Always `AdmissionReview`.
    #[serde(default)]
    pub kind: String,
    /// Set on incoming reviews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    /// Set on outgoing reviews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

/// The request half of a review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Request id, echoed in the response.
    #[serde(default)]
    pub uid: String,
    /// Kind of the object under admission.
    #[serde(default)]
    pub kind: GroupVersionKind,
    /// Namespace of the object.
    #[serde(default)]
    pub namespace: Option<String>,
    /// `CREATE`, `UPDATE`, ...
    #[serde(default)]
    pub operation: Option<String>,
    /// The object itself.
    #[serde(default)]
    pub object: Option<Value>,
}

/// Group, version and kind of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for core.
    #[serde(default)]
    pub group: String,
    /// API version.
    #[serde(default)]
    pub version: String,
    /// Resource kind, e.g. `Pod`.
    #[serde(default)]
    pub kind: String,
}

/// The response half of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Request id being answered.
    pub uid: String,
    /// Whether the object is admitted.
    pub allowed: bool,
    /// Outcome details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Outcome details carried in an admission response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// `Success` or `Failure`.
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable reason, e.g. `NotAcceptable`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// HTTP-style status code.
    pub code: u16,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors turning a review into a [`Workload`].
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The review body is not valid JSON of the expected shape.
    #[error("webhook: malformed admission review: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The review carries no request.
    #[error("webhook: admission request was nil")]
    MissingRequest,
    /// The request carries no object.
    #[error("webhook: request did not include object")]
    MissingObject,
    /// No decoder is registered for the object's kind.
    #[error("webhook: unsupported resource kind '{0}'")]
    UnsupportedKind(String),
    /// The object does not match its kind's schema.
    #[error("webhook: failed to decode {kind}: {source}")]
    Decode {
        /// Kind being decoded.
        kind: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Workload decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    init_containers: Vec<Container>,
}

impl PodSpec {
    fn images(self) -> Vec<String> {
        self.containers
            .into_iter()
            .chain(self.init_containers)
            .map(|c| c.image)
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatedSpec {
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct Templated {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: TemplatedSpec,
}

#[derive(Debug, Default, Deserialize)]
struct JobTemplate {
    #[serde(default)]
    spec: TemplatedSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CronJobSpec {
    #[serde(default)]
    job_template: JobTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct CronJob {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: CronJobSpec,
}

/// Namespace (from object metadata) and images extracted from an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedObject {
    /// `metadata.namespace`, if present.
    pub namespace: Option<String>,
    /// Container images, then init container images.
    pub images: Vec<String>,
}

/// Decodes one resource kind into a [`DecodedObject`].
pub type WorkloadDecoder = fn(&Value) -> Result<DecodedObject, serde_json::Error>;

fn from_value<T: DeserializeOwned>(object: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(object)
}

fn decode_pod(object: &Value) -> Result<DecodedObject, serde_json::Error> {
    let pod: Pod = from_value(object)?;
    Ok(DecodedObject {
        namespace: pod.metadata.namespace,
        images: pod.spec.images(),
    })
}

fn decode_templated(object: &Value) -> Result<DecodedObject, serde_json::Error> {
    let workload: Templated = from_value(object)?;
    Ok(DecodedObject {
        namespace: workload.metadata.namespace,
        images: workload.spec.template.spec.images(),
    })
}

fn decode_cron_job(object: &Value) -> Result<DecodedObject, serde_json::Error> {
    let cron: CronJob = from_value(object)?;
    Ok(DecodedObject {
        namespace: cron.metadata.namespace,
        images: cron.spec.job_template.spec.template.spec.images(),
    })
}

/// Registry of decoders keyed by resource kind.
#[derive(Clone, Default)]
pub struct WorkloadDecoders {
    decoders: BTreeMap<String, WorkloadDecoder>,
}

impl std::fmt::Debug for WorkloadDecoders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

impl WorkloadDecoders {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry for pods and the built-in pod-template workloads.
    pub fn with_defaults() -> Self {
        let mut decoders = Self::new();
        decoders.register("Pod", decode_pod);
        for kind in ["Deployment", "ReplicaSet", "StatefulSet", "DaemonSet", "Job"] {
            decoders.register(kind, decode_templated);
        }
        decoders.register("CronJob", decode_cron_job);
        decoders
    }

    /// Register (or replace) the decoder for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, decoder: WorkloadDecoder) -> &mut Self {
        self.decoders.insert(kind.into(), decoder);
        self
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    /// Decode the object of `request` into a [`Workload`].
    ///
    /// The request namespace wins over the object's metadata namespace.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when the object is missing, its kind has no
    /// decoder, or it does not match the kind's schema.
    pub fn decode(&self, request: &AdmissionRequest) -> Result<Workload, WebhookError> {
        let object = request
            .object
            .as_ref()
            .filter(|o| !o.is_null())
            .ok_or(WebhookError::MissingObject)?;
        let kind = request.kind.kind.as_str();
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| WebhookError::UnsupportedKind(kind.to_owned()))?;
        let decoded = decoder(object).map_err(|source| WebhookError::Decode {
            kind: kind.to_owned(),
            source,
        })?;

        let namespace = request
            .namespace
            .clone()
            .filter(|n| !n.is_empty())
            .or(decoded.namespace)
            .unwrap_or_default();

        Ok(Workload {
            namespace,
            images: decoded.images,
        })
    }
}

// ---------------------------------------------------------------------------
// Response shaping
// ---------------------------------------------------------------------------

fn status_reason(code: u16) -> &'static str {
    match code {
        200 => "",
        400 => "BadRequest",
        406 => "NotAcceptable",
        500 => "InternalError",
        _ => "Unknown",
    }
}

/// Wrap a decision into a response review answering `request`.
pub fn build_response(
    api_version: &str,
    request: Option<&AdmissionRequest>,
    decision: &AdmissionDecision,
) -> AdmissionReview {
    let api_version = if api_version.is_empty() {
        DEFAULT_API_VERSION
    } else {
        api_version
    };
    let status = if decision.allowed { "Success" } else { "Failure" };

    AdmissionReview {
        api_version: api_version.to_owned(),
        kind: REVIEW_KIND.to_owned(),
        request: None,
        response: Some(AdmissionResponse {
            uid: request.map(|r| r.uid.clone()).unwrap_or_default(),
            allowed: decision.allowed,
            status: Some(Status {
                status: status.to_owned(),
                message: decision.message.clone(),
                reason: status_reason(decision.status_code).to_owned(),
                code: decision.status_code,
            }),
        }),
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// Answers admission reviews using an [`AdmissionController`].
#[derive(Clone)]
pub struct Webhook {
    controller: AdmissionController,
    decoders: WorkloadDecoders,
}

impl Webhook {
    /// Create a webhook with an explicitly initialised decoder registry.
    pub fn new(controller: AdmissionController, decoders: WorkloadDecoders) -> Self {
        Self {
            controller,
            decoders,
        }
    }

    /// The controller making decisions.
    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// Extract the workload from a review.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when the review cannot be decoded.
    pub fn workload(&self, review: &AdmissionReview) -> Result<Workload, WebhookError> {
        let request = review.request.as_ref().ok_or(WebhookError::MissingRequest)?;
        self.decoders.decode(request)
    }

    /// Answer one review.
    pub async fn review(&self, review: &AdmissionReview) -> AdmissionReview {
        let decision = match self.workload(review) {
            Ok(workload) => {
                debug!(
                    namespace = %workload.namespace,
                    images = workload.images.len(),
                    "decoded workload"
                );
                self.controller.admit(&workload).await
            }
            Err(e) => {
                warn!(error = %e, "rejecting undecodable admission review");
                AdmissionDecision::bad_request(&e)
            }
        };
        build_response(&review.api_version, review.request.as_ref(), &decision)
    }

    /// Answer one JSON-encoded review with a JSON-encoded review.
    ///
    /// # Errors
    ///
    /// Returns an error only if the response cannot be serialized.
    pub async fn review_json(&self, body: &str) -> Result<String, serde_json::Error> {
        let response = match serde_json::from_str::<AdmissionReview>(body) {
            Ok(review) => self.review(&review).await,
            Err(e) => {
                let err = WebhookError::Malformed(e);
                warn!(error = %err, "rejecting malformed admission review");
                build_response("", None, &AdmissionDecision::bad_request(&err))
            }
        };
        serde_json::to_string(&response)
    }
}
