use super::*;

const ALPINE_DIGEST: &str =
    "sha256:2c96ae8ef1d40f4e5c1d5ea9a6a7a2b5e4ab1a0c0e1b0b3c2c5f6e7d8c9b0a1f";

fn parts(r: &Reference) -> (Option<&str>, &str, Option<&str>, Option<&str>) {
    (
        r.registry_str(),
        r.repository_str(),
        r.tag_str(),
        r.content_digest().map(ContentDigest::as_str),
    )
}

#[test]
fn parse_reference() {
    assert!(Reference::parse("balls").is_ok());
    assert!(Reference::parse("balls/").is_err());
    assert!(Reference::parse("balls/etc").is_ok());
    assert!(Reference::parse("balls/etc/and/more").is_ok());
    assert_eq!(
        parts(&Reference::parse("balls/etc/and/more").unwrap()),
        (None, "balls/etc/and/more", None, None)
    );
    assert!(Reference::parse("b-a-l-l-s").is_ok());
    assert!(Reference::parse("-balls").is_err());
    assert!(Reference::parse("--balls").is_err());
    assert!(Reference::parse("b--alls").is_ok());
    assert!(Reference::parse("Balls").is_err());
    assert!(Reference::parse("balls.io/image/of/my/balls").is_ok());
    assert!(Reference::parse("balls.io/image/of/my/balls:").is_err());
    assert!(Reference::parse("balls.io/image/of/my/balls:?").is_err());
    assert!(Reference::parse("balls.io/image/of/my/balls:0").is_ok());
    assert!(Reference::parse("balls.io/image/of/my/balls:.").is_err());
    assert!(Reference::parse("balls.io/image/of/my/balls:0.0").is_ok());
    assert_eq!(
        parts(&Reference::parse("balls.io/image/of/my/balls:0.0").unwrap()),
        (Some("balls.io"), "image/of/my/balls", Some("0.0"), None)
    );
    assert!(Reference::parse("balls.io:/ball").is_err());
    assert!(Reference::parse("balls.io:69/ball").is_ok());
    assert_eq!(
        parts(&Reference::parse("balls.io:69/ball").unwrap()),
        (Some("balls.io:69"), "ball", None, None)
    );
    assert_eq!(
        parts(&Reference::parse("balls:69").unwrap()),
        (None, "balls", Some("69"), None)
    );
    assert_eq!(
        parts(&Reference::parse("balls:69/ball").unwrap()),
        (Some("balls:69"), "ball", None, None)
    );
}

#[test]
fn parse_localhost() {
    assert_eq!(
        parts(&Reference::parse("localhost").unwrap()),
        (None, "localhost", None, None)
    );
    assert_eq!(
        parts(&Reference::parse("localhost/busybox").unwrap()),
        (Some("localhost"), "busybox", None, None)
    );
    assert_eq!(
        parts(&Reference::parse("localpost/busybox").unwrap()),
        (None, "localpost/busybox", None, None)
    );
}

#[test]
fn parse_digest_reference() {
    let s = format!("ghcr.io/stargz-containers/alpine:3.15.3-esgz@{}", ALPINE_DIGEST);
    let r = Reference::parse(&s).unwrap();
    assert_eq!(
        parts(&r),
        (
            Some("ghcr.io"),
            "stargz-containers/alpine",
            Some("3.15.3-esgz"),
            Some(ALPINE_DIGEST)
        )
    );
    assert_eq!(r.version_str(), ALPINE_DIGEST);
    assert_eq!(r.to_string(), s);
    assert!(Reference::parse("busybox@sha256:0123").is_err());
    assert!(Reference::parse(&format!("busybox@{}", ALPINE_DIGEST)).is_ok());
}

#[test]
fn registry_api_urls() {
    let r = Reference::parse("busybox").unwrap();
    assert_eq!(r.api_host(), "registry-1.docker.io");
    assert_eq!(r.api_repository(), "library/busybox");
    assert_eq!(r.version_str(), "latest");
    assert_eq!(
        r.api_base(),
        "https://registry-1.docker.io/v2/library/busybox"
    );

    let r = Reference::parse("docker.io/stargz/python:3.9").unwrap();
    assert_eq!(r.api_base(), "https://registry-1.docker.io/v2/stargz/python");
    assert_eq!(r.version_str(), "3.9");

    let r = Reference::parse("localhost:5000/tools/busybox").unwrap();
    assert!(!r.is_https());
    assert_eq!(r.api_base(), "http://localhost:5000/v2/tools/busybox");

    let r = Reference::parse("devbox:5000/busybox").unwrap();
    assert!(!r.is_https());
    assert_eq!(r.api_repository(), "busybox");

    let r = Reference::parse("ghcr.io/a/b").unwrap();
    assert!(r.is_https());
    assert_eq!(r.api_base(), "https://ghcr.io/v2/a/b");
}

#[test]
fn reference_from_str() {
    let r: Reference = "quay.io/coreos/etcd:v3.5.0".parse().unwrap();
    assert_eq!(r.to_string(), "quay.io/coreos/etcd:v3.5.0");
    assert_eq!(format!("{:?}", r), "Reference(quay.io/coreos/etcd:v3.5.0)");
    assert!("".parse::<Reference>().is_err());
}

#[test]
fn content_digest() {
    let digest = ContentDigest::from_content(b"");
    assert_eq!(
        digest.as_str(),
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert!(digest.verify(b"").is_ok());
    assert!(digest.verify(b"x").is_err());
    assert_eq!(ContentDigest::parse(digest.as_str()).unwrap(), digest);
    assert!(ContentDigest::parse("sha256:abc").is_err());
    assert!(ContentDigest::parse("sha256").is_err());
    assert!(ContentDigest::parse("sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855").is_err());
    let other = ContentDigest::parse("blake3:00112233445566778899aabbccddeeff").unwrap();
    assert_eq!(other.format_str(), "blake3");
    assert!(matches!(
        other.verify(b"anything"),
        Err(ImageError::UnsupportedDigest(_))
    ));
}
