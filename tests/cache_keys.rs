use wikifetch::cache::CacheKey;
use wikifetch::fetch::FetchRequest;

fn key(attributes: &[(&str, &str)]) -> String {
    let request = FetchRequest::from_attributes(attributes.iter().copied()).expect("request");
    CacheKey::build(request.identity(), request.parameters())
        .as_str()
        .to_string()
}

#[test]
fn canonical_keys_for_representative_requests() {
    let keys = [
        key(&[("src", "wiki:logo.svg"), ("w", "32"), ("fill", "red")]),
        key(&[
            ("fetcher", "markup"),
            ("id", "wiki:start"),
            ("mode", "page"),
            ("cache", "recache"),
        ]),
        key(&[("id", "wiki/sub/logo.png"), ("rev", "1700"), ("drive", "Assets")]),
        key(&[("fetcher", "cache-log"), ("id", "log"), ("limit", "10")]),
        key(&[
            ("media", "wiki:a.svg"),
            ("H", "10"),
            ("tseed", "x"),
            ("preserveAspectRatio", "none"),
        ]),
    ];

    insta::assert_snapshot!(keys.join("\n"), @r"
    media:wiki:logo.svg&color=red&width=32
    page:wiki:start&mode=page
    assets:wiki:sub:logo.png@1700
    cache:log&limit=10
    media:wiki:a.svg&height=10&preserveaspectratio=none
    ");
}

#[test]
fn digests_are_stable_hex() {
    let key = CacheKey::from_raw("page:wiki:start");
    let digest = key.digest();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(digest, CacheKey::from_raw("page:wiki:start").digest());
    assert_ne!(digest, CacheKey::from_raw("page:wiki:start&mode=page").digest());
}
