//! End-to-end cache behaviour through the registry, the pipeline and the disk store.

mod support;

use std::fs;

use wikifetch::cache::{CacheKey, CacheOutcome, EntryRef};
use wikifetch::domain::FetchError;
use wikifetch::fetch::FetchRequest;

use support::{Wiki, outcome, touch};

const FOO: &[(&str, &str)] = &[("fetcher", "markup"), ("id", "foo")];

#[test]
fn second_fetch_is_a_hit_without_regeneration() {
    let wiki = Wiki::new();
    wiki.page("foo", "# Foo\n\nBody text.\n");

    let ctx = wiki.request();
    let mut first = wiki.resolve(&ctx, FOO);
    let content = first.fetch_bytes(&ctx).expect("first fetch");
    assert_eq!(outcome(&ctx, "page:foo", "fragment"), Some(CacheOutcome::Miss));
    assert_eq!(wiki.renderer.calls(), 1);

    let key = first.cache_key().expect("key").clone();
    assert_eq!(key.as_str(), "page:foo");
    let store = &wiki.env.store;
    assert!(store.manifest_path(&key).exists());
    assert!(store.content_path(&EntryRef::new(key, "html")).exists());

    let (again, second) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(second, Some(CacheOutcome::Hit));
    assert_eq!(again, content);
    assert_eq!(wiki.renderer.calls(), 1);
}

#[test]
fn source_change_forces_a_miss_with_a_new_buster() {
    let wiki = Wiki::new();
    let source = wiki.page("foo", "Original\n");

    let ctx = wiki.request();
    let mut first = wiki.resolve(&ctx, FOO);
    let old_buster = first.buster(&ctx).expect("buster").expect("written buster");

    fs::write(&source, "Changed\n").expect("edit");
    touch(&source);

    let ctx = wiki.request();
    let mut second = wiki.resolve(&ctx, FOO);
    let html = second.fetch_string(&ctx).expect("refetch");
    assert!(html.contains("Changed"));
    assert_eq!(outcome(&ctx, "page:foo", "fragment"), Some(CacheOutcome::Miss));
    let new_buster = second.buster(&ctx).expect("buster").expect("written buster");
    assert_ne!(old_buster, new_buster);
    assert_eq!(wiki.renderer.calls(), 2);
}

#[test]
fn nocache_always_regenerates() {
    let wiki = Wiki::new();
    wiki.page("foo", "Body\n");
    let nocache = [("fetcher", "markup"), ("id", "foo"), ("cache", "nocache")];

    let (_, cached) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(cached, Some(CacheOutcome::Miss));

    for expected_calls in [2, 3] {
        let (_, forced) = wiki.fetch(&nocache, "page:foo", "fragment");
        assert_eq!(forced, Some(CacheOutcome::Miss));
        assert_eq!(wiki.renderer.calls(), expected_calls);
    }
}

#[test]
fn unknown_mime_without_fetcher_is_not_found() {
    let wiki = Wiki::new();
    wiki.media("wiki/blob.zzqx", b"opaque");

    let ctx = wiki.request();
    let resolved = wiki
        .registry
        .resolve_attributes([("id", "wiki:blob.zzqx")], &ctx);
    match resolved {
        Err(FetchError::NotFound { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(fetcher) => panic!("resolved to `{}`", fetcher.name()),
    }
}

#[test]
fn uncacheable_kind_never_touches_the_store() {
    let wiki = Wiki::new();
    let login = [("fetcher", "login"), ("id", "start")];

    for expected_lookups in [1, 2] {
        let ctx = wiki.request();
        let mut fetcher = wiki.resolve(&ctx, &login);
        assert!(fetcher.cache_key().is_err_and(|err| err.is_not_supported()));
        let html = fetcher.fetch_string(&ctx).expect("form");
        assert!(html.contains("<form"));
        assert_eq!(outcome(&ctx, "page:start", "form"), Some(CacheOutcome::Bypass));
        assert_eq!(wiki.values.lookups("login.title"), expected_lookups);
    }

    let entries = fs::read_dir(wiki.env.store.root())
        .map(|entries| entries.count())
        .unwrap_or_default();
    assert_eq!(entries, 0);
}

#[test]
fn processing_twice_generates_once() {
    let wiki = Wiki::new();
    wiki.page("foo", "Body\n");

    let ctx = wiki.request();
    let mut fetcher = wiki.resolve(
        &ctx,
        &[("fetcher", "markup"), ("id", "foo"), ("cache", "nocache")],
    );
    let first = fetcher.fetch_bytes(&ctx).expect("first");
    let second = fetcher.fetch_bytes(&ctx).expect("second");
    fetcher.fetch_url(&ctx).expect("url");

    assert_eq!(first, second);
    assert_eq!(wiki.renderer.calls(), 1);
}

#[test]
fn config_file_change_invalidates_entries() {
    let wiki = Wiki::new();
    wiki.page("foo", "Body\n");

    wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Hit));

    touch(&wiki.path("conf/local.toml"));
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Miss));
}

#[test]
fn config_value_change_invalidates_entries() {
    let wiki = Wiki::new();
    wiki.page("foo", "one\ntwo\n");
    wiki.values.set("markup.hard_breaks", "no");

    let (soft, _) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Hit));

    wiki.values.set("markup.hard_breaks", "yes");
    let (hard, changed) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(changed, Some(CacheOutcome::Miss));
    assert_ne!(soft, hard);
}

#[test]
fn included_page_change_invalidates_the_includer() {
    let wiki = Wiki::new();
    wiki.page("foo", "# Foo\n\n{{page>nav}}\n");
    let nav = wiki.page("nav", "*menu*\n");

    wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Hit));

    fs::write(&nav, "*new menu*\n").expect("edit nav");
    touch(&nav);
    let (html, refreshed) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(refreshed, Some(CacheOutcome::Miss));
    assert!(String::from_utf8_lossy(&html).contains("new menu"));
}

#[test]
fn missing_include_renders_inline_until_the_page_exists() {
    let wiki = Wiki::new();
    wiki.page("foo", "# Foo\n\n{{page>missing}}\n\nafter\n");

    let (html, first) = wiki.fetch(FOO, "page:foo", "fragment");
    let html = String::from_utf8_lossy(&html).into_owned();
    assert_eq!(first, Some(CacheOutcome::Miss));
    assert!(html.contains("<h1>Foo</h1>"));
    assert!(html.contains("data-error-kind=\"not_found\""));
    assert!(html.contains("<p>after</p>"));
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Hit));

    wiki.page("missing", "*found it*\n");
    let (html, refreshed) = wiki.fetch(FOO, "page:foo", "fragment");
    let html = String::from_utf8_lossy(&html).into_owned();
    assert_eq!(refreshed, Some(CacheOutcome::Miss));
    assert!(html.contains("<em>found it</em>"));
    assert!(!html.contains("wikifetch-error"));
}

#[test]
fn self_include_without_a_cache_renders_inline() {
    let wiki = Wiki::with_cache(|cache| cache.enabled = false);
    wiki.page("foo", "top\n\n{{page>foo}}\n");

    let (html, outcome) = wiki.fetch(FOO, "page:foo", "fragment");
    assert_eq!(outcome, Some(CacheOutcome::Bypass));
    let html = String::from_utf8_lossy(&html).into_owned();
    assert!(html.contains("<p>top</p>"));
    assert!(html.contains("data-error-kind=\"bad_argument\""));
}

#[test]
fn dotted_page_ids_resolve_to_their_own_files() {
    let wiki = Wiki::new();
    wiki.page("v1.2", "release two\n");
    wiki.page("v1.3", "release three\n");

    let two = [("fetcher", "markup"), ("id", "v1.2")];
    let three = [("fetcher", "markup"), ("id", "v1.3")];
    let (html, _) = wiki.fetch(&two, "page:v1.2", "fragment");
    assert!(String::from_utf8_lossy(&html).contains("release two"));
    let (html, outcome) = wiki.fetch(&three, "page:v1.3", "fragment");
    assert_eq!(outcome, Some(CacheOutcome::Miss));
    assert!(String::from_utf8_lossy(&html).contains("release three"));
}

#[test]
fn distinct_parameter_sets_are_served_distinct_content() {
    let wiki = Wiki::new();
    wiki.media("wiki/logo.svg", b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>");
    let smuggled = [("src", "wiki:logo.svg"), ("fill", "red"), ("lang", "a&width=5")];
    let resized = [("src", "wiki:logo.svg"), ("fill", "red"), ("lang", "a"), ("width", "5")];

    let ctx = wiki.request();
    let first = wiki.resolve(&ctx, &smuggled);
    let second = wiki.resolve(&ctx, &resized);
    assert_ne!(first.cache_key().expect("key"), second.cache_key().expect("key"));

    wiki.fetch(&smuggled, "media:wiki:logo.svg", "image");
    let (svg, outcome) = wiki.fetch(&resized, "media:wiki:logo.svg", "image");
    assert_eq!(outcome, Some(CacheOutcome::Miss));
    assert!(String::from_utf8_lossy(&svg).contains("width=\"5\""));
}

#[test]
fn requested_page_changes_invalidate_page_mode() {
    let wiki = Wiki::new();
    wiki.page("foo", "Foo\n");
    wiki.page("bar", "Bar\n");
    wiki.page("sidebar", "Side\n");
    let page = [("fetcher", "markup"), ("id", "foo"), ("mode", "page")];
    let for_page = |id: &str| {
        let ctx = wiki.request().with_requested_page(
            wikifetch::domain::ResourceIdentity::parse("page", id).expect("identity"),
        );
        let mut fetcher = wiki.resolve(&ctx, &page);
        fetcher.fetch_bytes(&ctx).expect("page");
        outcome(&ctx, "page:foo", "page")
    };

    assert_eq!(for_page("foo"), Some(CacheOutcome::Miss));
    assert_eq!(for_page("foo"), Some(CacheOutcome::Hit));
    assert_eq!(for_page("bar"), Some(CacheOutcome::Miss));
}

#[test]
fn disabled_cache_bypasses_the_store() {
    let wiki = Wiki::with_cache(|cache| cache.enabled = false);
    wiki.page("foo", "Body\n");

    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Bypass));
    assert_eq!(wiki.fetch(FOO, "page:foo", "fragment").1, Some(CacheOutcome::Bypass));
    assert_eq!(wiki.renderer.calls(), 2);
    assert!(!wiki.env.store.log_path().exists());
}

#[test]
fn fetch_url_round_trips_to_an_equal_request() {
    let wiki = Wiki::new();
    wiki.media("wiki/logo.svg", b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>");
    wiki.page("foo", "Body\n");
    let attic = wiki.path("media_attic/wiki");
    fs::create_dir_all(&attic).expect("attic");
    fs::write(attic.join("logo.1700.svg"), "<svg/>").expect("old revision");

    let cases: [&[(&str, &str)]; 3] = [
        &[("src", "wiki:logo.svg"), ("w", "32"), ("fill", "red")],
        &[("fetcher", "markup"), ("id", "foo"), ("mode", "page"), ("cache", "recache")],
        &[("fetcher", "raw"), ("id", "wiki:logo.svg"), ("rev", "1700"), ("buster", "x")],
    ];

    for attributes in cases {
        let ctx = wiki.request();
        let mut fetcher = wiki.resolve(&ctx, attributes);
        let url = fetcher.fetch_url(&ctx).expect("url");
        let decoded = FetchRequest::from_url(&url).expect("decoded");
        assert_eq!(&decoded, fetcher.request());

        let again = wiki.registry.resolve_url(&url, &ctx).expect("resolve url");
        assert_eq!(again.name(), fetcher.name());
        assert_eq!(again.cache_key().ok(), fetcher.cache_key().ok());
    }
}

#[test]
fn keys_ignore_cache_mode_and_buster() {
    let key = |attributes: &[(&str, &str)]| {
        let request =
            FetchRequest::from_attributes(attributes.iter().copied()).expect("request");
        CacheKey::build(request.identity(), request.parameters())
    };

    let base = key(&[("src", "wiki:logo.svg"), ("w", "32")]);
    assert_eq!(base, key(&[("w", "32"), ("src", "wiki:logo.svg")]));
    assert_eq!(base, key(&[("src", "wiki:logo.svg"), ("w", "32"), ("cache", "nocache")]));
    assert_eq!(base, key(&[("src", "wiki:logo.svg"), ("width", "32"), ("tseed", "123")]));
    assert_ne!(base, key(&[("src", "wiki:logo.svg"), ("w", "33")]));
}
