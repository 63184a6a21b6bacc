//! Managed-registry image selection tests.

use ecr_admission::registry::filter::RegistryFilter;

const UNTAGGED_IMAGE: &str = "273450712882.dkr.ecr.us-east-2.amazonaws.com/namespace/repo@sha256:e5e2a3236e64483c50dd2811e46e9cd49c67e82271e60d112ca69a075fc23005";
const TAGGED_IMAGE: &str = "273450712882.dkr.ecr.us-east-2.amazonaws.com/namespace/repo:40d6072";
const NO_NAMESPACE_IMAGE: &str = "273450712882.dkr.ecr.us-east-2.amazonaws.com/repo:40d6072";
const CN_IMAGE: &str = "273450712882.dkr.ecr.cn-north-1.amazonaws.com/namespace/repo:40d6072";
const CN_DOMAIN_IMAGE: &str =
    "273450712882.dkr.ecr.cn-north-1.amazonaws.com.cn/namespace/repo:40d6072";
const FIPS_IMAGE: &str = "273450712882.dkr.ecr-fips.us-east-2.amazonaws.com/namespace/repo:40d6072";
const ALIASED_IMAGE: &str =
    "myaccountalias.dkr.ecr-fips.us-east-2.amazonaws.com/namespace/repo:40d6072";

const TAGGED_PATH: &str = "namespace/repo:40d6072";
const UNTAGGED_PATH: &str =
    "namespace/repo@sha256:e5e2a3236e64483c50dd2811e46e9cd49c67e82271e60d112ca69a075fc23005";

fn filter() -> RegistryFilter {
    match RegistryFilter::new() {
        Ok(filter) => filter,
        Err(e) => panic!("managed host pattern should compile: {e}"),
    }
}

#[test]
fn selects_managed_images() {
    let cases = [
        ("untagged", UNTAGGED_IMAGE, UNTAGGED_PATH),
        ("tagged", TAGGED_IMAGE, TAGGED_PATH),
        ("china region", CN_IMAGE, TAGGED_PATH),
        ("china domain", CN_DOMAIN_IMAGE, TAGGED_PATH),
        ("fips", FIPS_IMAGE, TAGGED_PATH),
        ("no namespace", NO_NAMESPACE_IMAGE, "repo:40d6072"),
        ("account alias", ALIASED_IMAGE, TAGGED_PATH),
    ];
    for (name, image, want) in cases {
        assert_eq!(filter().filter([image]), vec![want.to_owned()], "case {name}");
    }
}

#[test]
fn removes_duplicates() {
    assert_eq!(
        filter().filter([TAGGED_IMAGE, TAGGED_IMAGE]),
        vec![TAGGED_PATH.to_owned()]
    );
}

#[test]
fn keeps_first_seen_order() {
    assert_eq!(
        filter().filter([TAGGED_IMAGE, UNTAGGED_IMAGE, TAGGED_IMAGE]),
        vec![TAGGED_PATH.to_owned(), UNTAGGED_PATH.to_owned()]
    );
}

#[test]
fn drops_images_outside_the_managed_registry() {
    let images = [
        "",
        "elgoog/sselortsid",
        "nginx",
        "quay.io/kubernetes-ingress-controller/nginx-ingress-controller:0.30.0",
        "273450712882.dkr.ecr.us-east-2.amazonaws.com.evil.io/namespace/repo:1",
        "evil.io/273450712882.dkr.ecr.us-east-2.amazonaws.com/namespace/repo:1",
        "273450712882.dkr.ecr.us-east-2.amazonaws.com/",
    ];
    for image in images {
        assert!(filter().filter([image]).is_empty(), "{image:?} should be dropped");
    }
}

#[test]
fn mixed_workload_keeps_only_managed_images() {
    let images = vec![
        "quay.io/kubernetes-ingress-controller/nginx-ingress-controller:0.30.0".to_owned(),
        TAGGED_IMAGE.to_owned(),
        "busybox:1.36".to_owned(),
    ];
    assert_eq!(filter().filter(&images), vec![TAGGED_PATH.to_owned()]);
}

#[test]
fn managed_host_grammar() {
    let filter = filter();
    assert!(filter.is_managed_host("273450712882.dkr.ecr.us-east-2.amazonaws.com"));
    assert!(filter.is_managed_host("273450712882.dkr.ecr-fips.us-gov-west-1.amazonaws.com"));
    assert!(filter.is_managed_host("273450712882.dkr.ecr.cn-north-1.amazonaws.com.cn"));
    assert!(!filter.is_managed_host("273450712882.dkr.ecr.us-east-2.amazonaws.org"));
    assert!(!filter.is_managed_host("dkr.ecr.us-east-2.amazonaws.com"));
    assert!(!filter.is_managed_host("public.ecr.aws"));
}

#[test]
fn managed_path_strips_host() {
    assert_eq!(filter().managed_path(TAGGED_IMAGE), Some(TAGGED_PATH.to_owned()));
    assert_eq!(filter().managed_path("repo:1"), None);
}

#[test]
fn allowed_accounts_restrict_selection() {
    let filter = match RegistryFilter::with_allowed_accounts(vec!["myaccountalias".to_owned()]) {
        Ok(filter) => filter,
        Err(e) => panic!("managed host pattern should compile: {e}"),
    };
    assert_eq!(
        filter.filter([TAGGED_IMAGE, ALIASED_IMAGE]),
        vec![TAGGED_PATH.to_owned()]
    );
    assert!(filter.is_managed_host("myaccountalias.dkr.ecr-fips.us-east-2.amazonaws.com"));
    assert!(!filter.is_managed_host("273450712882.dkr.ecr.us-east-2.amazonaws.com"));
}

#[test]
fn reference_keeps_stripped_host_as_registry() {
    let image = "273450712882.dkr.ecr.us-east-2.amazonaws.com/my.team/service:1";
    let reference = match filter().reference(image) {
        Some(Ok(reference)) => reference,
        other => panic!("{image} should yield a reference, got {other:?}"),
    };
    assert_eq!(reference.registry, "273450712882.dkr.ecr.us-east-2.amazonaws.com");
    assert_eq!(reference.repository, "my.team/service");
    assert_eq!(reference.tag_or_digest.as_str(), "1");
    assert_eq!(reference.to_string(), image);

    assert!(filter().reference("localhost/x:1").is_none());
    assert!(matches!(
        filter().reference("273450712882.dkr.ecr.us-east-2.amazonaws.com/repo"),
        Some(Err(_))
    ));
}
