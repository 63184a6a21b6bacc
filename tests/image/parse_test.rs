//! Image reference parsing tests.

use ecr_admission::image::{ImageReference, NotParseable, TagOrDigest};

fn parse(raw: &str) -> ImageReference {
    match ImageReference::parse(raw) {
        Ok(reference) => reference,
        Err(e) => panic!("{raw} should parse: {e}"),
    }
}

fn reject(raw: &str) -> NotParseable {
    match ImageReference::parse(raw) {
        Ok(reference) => panic!("{raw} should be rejected, got {reference:?}"),
        Err(e) => e,
    }
}

#[test]
fn parses_repository_and_tag() {
    let reference = parse("repo:40d6072");
    assert_eq!(reference.registry, "");
    assert_eq!(reference.repository, "repo");
    assert_eq!(reference.tag_or_digest, TagOrDigest::Tag("40d6072".to_owned()));
}

#[test]
fn parses_namespaced_repository() {
    let reference = parse("namespace/repo:40d6072");
    assert_eq!(reference.registry, "");
    assert_eq!(reference.repository, "namespace/repo");
}

#[test]
fn parses_digest() {
    let reference = parse(
        "namespace/repo@sha256:e5e2a3236e64483c50dd2811e46e9cd49c67e82271e60d112ca69a075fc23005",
    );
    assert_eq!(reference.repository, "namespace/repo");
    assert_eq!(
        reference.tag_or_digest,
        TagOrDigest::Digest(
            "sha256:e5e2a3236e64483c50dd2811e46e9cd49c67e82271e60d112ca69a075fc23005".to_owned()
        )
    );
}

#[test]
fn digest_wins_over_tag() {
    let reference = parse("repo:v1@sha256:abc");
    assert_eq!(reference.repository, "repo:v1");
    assert_eq!(reference.tag_or_digest, TagOrDigest::Digest("sha256:abc".to_owned()));
}

#[test]
fn dotted_first_segment_stays_in_repository() {
    let reference = parse("my.team/service:1");
    assert_eq!(reference.registry, "");
    assert_eq!(reference.repository, "my.team/service");
    assert_eq!(reference.tag_or_digest, TagOrDigest::Tag("1".to_owned()));
}

#[test]
fn localhost_first_segment_stays_in_repository() {
    let reference = parse("localhost/x:1");
    assert_eq!(reference.registry, "");
    assert_eq!(reference.repository, "localhost/x");
    assert_eq!(reference.tag_or_digest.as_str(), "1");
}

#[test]
fn host_like_prefix_is_never_split_off() {
    let reference = parse("273450712882.dkr.ecr.us-east-2.amazonaws.com/namespace/repo:40d6072");
    assert_eq!(reference.registry, "");
    assert_eq!(
        reference.repository,
        "273450712882.dkr.ecr.us-east-2.amazonaws.com/namespace/repo"
    );
    assert_eq!(reference.tag_or_digest.as_str(), "40d6072");

    let reference = parse("localhost:5000/repo:1");
    assert_eq!(reference.registry, "");
    assert_eq!(reference.repository, "localhost:5000/repo");
    assert_eq!(reference.tag_or_digest.as_str(), "1");
}

#[test]
fn display_round_trips() {
    for raw in [
        "repo:40d6072",
        "namespace/repo@sha256:abc",
        "quay.io/kubernetes-ingress-controller/nginx-ingress-controller:0.30.0",
        "my.team/service:1",
        "my.team/service@sha256:abc",
        "localhost/x:1",
    ] {
        assert_eq!(parse(raw).to_string(), raw);
    }
}

#[test]
fn rejects_missing_separator() {
    let err = reject("repo");
    assert_eq!(err.raw, "repo");
    assert_eq!(err.detail, "missing tag or digest");
}

#[test]
fn rejects_every_input_without_separator() {
    for raw in ["", "a/b", "my.team/svc", "localhost"] {
        let err = reject(raw);
        assert_eq!(err.raw, raw);
        assert_eq!(err.detail, "missing tag or digest", "input {raw:?}");
    }
}

#[test]
fn rejects_empty_repository() {
    assert_eq!(reject(":tag").detail, "empty repository");
    assert_eq!(reject("@sha256:abc").detail, "empty repository");
}

#[test]
fn rejects_empty_tag_or_digest() {
    assert_eq!(reject("repo:").detail, "empty tag");
    assert_eq!(reject("repo@").detail, "empty digest");
}

#[test]
fn rejects_tag_containing_path_separator() {
    assert_eq!(reject("team/repo:5000/x").detail, "tag contains a path separator");
}

#[test]
fn not_parseable_message_names_the_input() {
    assert_eq!(
        reject("repo").to_string(),
        "image reference 'repo' is not parseable: missing tag or digest"
    );
}
