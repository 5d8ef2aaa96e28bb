//! Fetch URL encoding, the inverse of [`FetchRequest::from_url`].

use url::Url;

use crate::domain::params::{BUSTER, CACHE, DRIVE, FETCHER, ID, REV};
use crate::domain::{CacheMode, FetchError};

use super::request::{FetchRequest, default_drive};

/// Encode `request` for the fetcher `name` against `base`.
///
/// Query order is fixed: fetcher, drive (only when not the fetcher's default),
/// id, rev, remaining parameters by name, cache (only when not the default),
/// then the buster when one is known.
pub fn fetch_url(
    base: &Url,
    name: &str,
    request: &FetchRequest,
    buster: Option<&str>,
) -> Result<Url, FetchError> {
    if base.cannot_be_a_base() {
        return Err(FetchError::internal(format!(
            "fetch base url `{base}` cannot carry a query"
        )));
    }

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let identity = request.identity();
        let mut query = url.query_pairs_mut();
        query.append_pair(FETCHER, name);
        if identity.drive().as_str() != default_drive(Some(name)) {
            query.append_pair(DRIVE, identity.drive().as_str());
        }
        query.append_pair(ID, identity.path().as_str());
        if let Some(revision) = identity.revision() {
            query.append_pair(REV, &revision.to_string());
        }
        for (param, value) in request.parameters().iter() {
            if param != CACHE {
                query.append_pair(param, value);
            }
        }
        if request.cache_mode() != CacheMode::Cache {
            query.append_pair(CACHE, request.cache_mode().as_str());
        }
        if let Some(buster) = buster {
            query.append_pair(BUSTER, buster);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://wiki.test/lib/fetch.php").expect("url")
    }

    #[test]
    fn query_order_is_fixed() {
        let request = FetchRequest::from_attributes([
            ("w", "20"),
            ("src", "wiki:logo.svg"),
            ("cache", "nocache"),
            ("color", "red"),
        ])
        .expect("request");
        let url = fetch_url(&base(), "svg", &request, Some("abc")).expect("url");
        assert_eq!(
            url.as_str(),
            "http://wiki.test/lib/fetch.php?fetcher=svg&id=wiki%3Alogo.svg&color=red&width=20&cache=nocache&tseed=abc"
        );
    }

    #[test]
    fn non_default_drive_and_revision_are_kept() {
        let request = FetchRequest::from_attributes([
            ("id", "wiki:start"),
            ("drive", "page"),
            ("rev", "1700"),
        ])
        .expect("request");
        let url = fetch_url(&base(), "raw", &request, None).expect("url");
        assert_eq!(
            url.query(),
            Some("fetcher=raw&drive=page&id=wiki%3Astart&rev=1700")
        );

        let reparsed = FetchRequest::from_url(&url).expect("reparse");
        assert_eq!(reparsed.identity(), request.identity());
        assert_eq!(reparsed.parameters(), request.parameters());
    }

    #[test]
    fn default_drive_is_omitted() {
        let request = FetchRequest::from_attributes([("id", "wiki:start"), ("fetcher", "markup")])
            .expect("request");
        let url = fetch_url(&base(), "markup", &request, None).expect("url");
        assert_eq!(url.query(), Some("fetcher=markup&id=wiki%3Astart"));
    }
}
