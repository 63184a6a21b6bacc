//! AdmissionReview round trips through the webhook.

use std::sync::Arc;

use serde_json::{json, Value};

use ecr_admission::admission::{AdmissionController, IMAGES_NOT_FOUND, PASS_MESSAGE};
use ecr_admission::config::Config;
use ecr_admission::webhook::{AdmissionReview, Webhook, WorkloadDecoders, DEFAULT_API_VERSION};

use crate::common::{MockRegistry, TAGGED_IMAGE, THIRD_PARTY_IMAGE};

const UID: &str = "e77141b6-6033-11ea-8d6a-0ac25c990f4a";

/// A v1beta1 review creating a single-container pod, as sent by a
/// ReplicaSet controller.
fn review_with_one_image(namespace: &str, image: &str) -> String {
    json!({
        "kind": "AdmissionReview",
        "apiVersion": "admission.k8s.io/v1beta1",
        "request": {
            "uid": UID,
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": namespace,
            "operation": "CREATE",
            "userInfo": {
                "username": "system:serviceaccount:kube-system:replicaset-controller",
                "groups": ["system:serviceaccounts", "system:authenticated"]
            },
            "object": {
                "kind": "Pod",
                "apiVersion": "v1",
                "metadata": {
                    "name": "echo-68f4474876-dzsjm",
                    "namespace": namespace,
                    "labels": {"app": "echo"}
                },
                "spec": {
                    "containers": [{
                        "name": "echo",
                        "image": image,
                        "ports": [{"containerPort": 80, "protocol": "TCP"}],
                        "imagePullPolicy": "IfNotPresent"
                    }],
                    "restartPolicy": "Always"
                },
                "status": {"phase": "Pending"}
            },
            "oldObject": null,
            "dryRun": false
        }
    })
    .to_string()
}

fn webhook(registry: &Arc<MockRegistry>) -> Webhook {
    let controller = match AdmissionController::with_registry(&Config::default(), registry.clone())
    {
        Ok(controller) => controller,
        Err(e) => panic!("controller should build: {e}"),
    };
    Webhook::new(controller, WorkloadDecoders::with_defaults())
}

async fn answer(webhook: &Webhook, body: &str) -> Value {
    let response = match webhook.review_json(body).await {
        Ok(response) => response,
        Err(e) => panic!("response should serialize: {e}"),
    };
    match serde_json::from_str(&response) {
        Ok(value) => value,
        Err(e) => panic!("response should be JSON: {e}"),
    }
}

#[tokio::test]
async fn compliant_pod_is_admitted() {
    let registry = Arc::new(MockRegistry::new().with_compliant("namespace/repo"));

    let review = answer(
        &webhook(&registry),
        &review_with_one_image("echo-namespace", TAGGED_IMAGE),
    )
    .await;

    assert_eq!(review["apiVersion"], "admission.k8s.io/v1beta1");
    assert_eq!(review["kind"], "AdmissionReview");
    assert!(review.get("request").is_none());
    assert_eq!(review["response"]["uid"], UID);
    assert_eq!(review["response"]["allowed"], true);
    assert_eq!(review["response"]["status"]["status"], "Success");
    assert_eq!(review["response"]["status"]["message"], PASS_MESSAGE);
    assert_eq!(review["response"]["status"]["code"], 200);
    assert!(review["response"]["status"].get("reason").is_none());
}

#[tokio::test]
async fn mutable_repository_is_refused() {
    let registry = Arc::new(MockRegistry::new().with_repository("namespace/repo", false, true));

    let review = answer(
        &webhook(&registry),
        &review_with_one_image("echo-namespace", TAGGED_IMAGE),
    )
    .await;

    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["status"], "Failure");
    assert_eq!(review["response"]["status"]["reason"], "NotAcceptable");
    assert_eq!(review["response"]["status"]["code"], 406);
    let message = review["response"]["status"]["message"]
        .as_str()
        .unwrap_or_default();
    assert!(message.contains("namespace/repo"), "message: {message}");
}

#[tokio::test]
async fn third_party_image_is_refused() {
    let registry = Arc::new(MockRegistry::new());

    let review = answer(
        &webhook(&registry),
        &review_with_one_image("echo-namespace", THIRD_PARTY_IMAGE),
    )
    .await;

    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["message"], IMAGES_NOT_FOUND);
    assert_eq!(registry.describe_calls(), 0);
}

#[tokio::test]
async fn critical_namespace_is_admitted_without_registry_calls() {
    let registry = Arc::new(MockRegistry::new());

    let review = answer(
        &webhook(&registry),
        &review_with_one_image("kube-system", TAGGED_IMAGE),
    )
    .await;

    assert_eq!(review["response"]["allowed"], true);
    assert_eq!(registry.describe_calls(), 0);
}

#[tokio::test]
async fn registry_failure_is_an_internal_error() {
    let registry = Arc::new(MockRegistry::new().with_failing_describe("namespace/repo"));

    let review = answer(
        &webhook(&registry),
        &review_with_one_image("echo-namespace", TAGGED_IMAGE),
    )
    .await;

    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["code"], 500);
    assert_eq!(review["response"]["status"]["reason"], "InternalError");
}

#[tokio::test]
async fn request_without_object_is_a_bad_request() {
    let body = json!({
        "kind": "AdmissionReview",
        "apiVersion": "admission.k8s.io/v1beta1",
        "request": {"uid": UID}
    })
    .to_string();
    let registry = Arc::new(MockRegistry::new());

    let review = answer(&webhook(&registry), &body).await;

    assert_eq!(review["response"]["uid"], UID);
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["code"], 400);
    assert_eq!(
        review["response"]["status"]["message"],
        "webhook: request did not include object"
    );
}

#[tokio::test]
async fn review_without_request_is_a_bad_request() {
    let registry = Arc::new(MockRegistry::new());

    let review = answer(&webhook(&registry), r#"{"kind":"AdmissionReview"}"#).await;

    assert_eq!(review["apiVersion"], DEFAULT_API_VERSION);
    assert_eq!(review["response"]["uid"], "");
    assert_eq!(review["response"]["status"]["code"], 400);
    assert_eq!(
        review["response"]["status"]["message"],
        "webhook: admission request was nil"
    );
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let registry = Arc::new(MockRegistry::new());

    let review = answer(&webhook(&registry), "{not json").await;

    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["status"]["code"], 400);
    assert_eq!(review["response"]["status"]["reason"], "BadRequest");
}

#[tokio::test]
async fn typed_review_answers_typed() {
    let registry = Arc::new(MockRegistry::new().with_compliant("namespace/repo"));
    let request: AdmissionReview =
        match serde_json::from_str(&review_with_one_image("echo-namespace", TAGGED_IMAGE)) {
            Ok(review) => review,
            Err(e) => panic!("fixture should decode: {e}"),
        };

    let review = webhook(&registry).review(&request).await;

    let response = review.response.unwrap_or_default();
    assert_eq!(response.uid, UID);
    assert!(response.allowed);
}
