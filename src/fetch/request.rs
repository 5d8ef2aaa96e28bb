//! Parsed fetch requests.
//!
//! A URL query and a markup tag's attribute map are two encodings of the same
//! request; both funnel through [`FetchRequest::from_parameters`].

use url::Url;

use crate::domain::params::{BUSTER, CACHE, DRIVE, FETCHER, ID, REV};
use crate::domain::{CacheMode, Drive, FetchError, RequestParameters, ResourceIdentity, WikiPath};

/// Drive assumed when a request names none.
pub fn default_drive(fetcher: Option<&str>) -> &'static str {
    match fetcher {
        Some("markup") | Some("login") => Drive::PAGE,
        Some("cache-log") => Drive::CACHE,
        _ => Drive::MEDIA,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    fetcher: Option<String>,
    identity: ResourceIdentity,
    parameters: RequestParameters,
    cache_mode: CacheMode,
}

impl FetchRequest {
    /// Build from a fetch URL's query string.
    pub fn from_url(url: &Url) -> Result<Self, FetchError> {
        Self::from_parameters(RequestParameters::from_pairs(url.query_pairs()))
    }

    /// Build from a markup tag's parsed attributes.
    pub fn from_attributes<I, K, V>(attributes: I) -> Result<Self, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::from_parameters(RequestParameters::from_pairs(attributes))
    }

    /// Split identity parameters off a normalised parameter set.
    ///
    /// `id` is mandatory. The buster is derived, never stored, and a default
    /// cache mode is dropped so both encodings normalise identically.
    pub fn from_parameters(mut parameters: RequestParameters) -> Result<Self, FetchError> {
        let fetcher = parameters
            .remove(FETCHER)
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty());

        let id = parameters
            .remove(ID)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| FetchError::bad_argument(ID, "a resource identifier is required"))?;

        let drive = match parameters.remove(DRIVE).filter(|d| !d.trim().is_empty()) {
            Some(drive) => Drive::parse(&drive)?,
            None => Drive::parse(default_drive(fetcher.as_deref()))?,
        };

        let revision = match parameters.remove(REV).filter(|rev| !rev.is_empty()) {
            None => None,
            Some(rev) => Some(rev.parse::<u64>().map_err(|_| {
                FetchError::bad_argument(REV, format!("`{rev}` is not a revision timestamp"))
            })?),
        };

        let cache_mode = parameters.cache_mode()?;
        parameters.remove(CACHE);
        if cache_mode != CacheMode::Cache {
            parameters.insert(CACHE, cache_mode.as_str());
        }
        parameters.remove(BUSTER);

        let identity = ResourceIdentity::new(drive, WikiPath::parse(&id)?).with_revision(revision);

        Ok(Self {
            fetcher,
            identity,
            parameters,
            cache_mode,
        })
    }

    /// Request for a known identity with no output parameters (nested fragments).
    pub fn for_identity(fetcher: &str, identity: ResourceIdentity, cache_mode: CacheMode) -> Self {
        let mut parameters = RequestParameters::new();
        if cache_mode != CacheMode::Cache {
            parameters.insert(CACHE, cache_mode.as_str());
        }
        Self {
            fetcher: Some(fetcher.to_string()),
            identity,
            parameters,
            cache_mode,
        }
    }

    /// Explicit fetcher-name token, if the request carried one.
    pub fn fetcher(&self) -> Option<&str> {
        self.fetcher.as_deref()
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn parameters(&self) -> &RequestParameters {
        &self.parameters
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// Drop a parameter whose value equals the kind's default, so it never enters the key.
    pub fn drop_default(&mut self, name: &str, default: &str) {
        if self
            .parameters
            .get(name)
            .is_some_and(|value| value.eq_ignore_ascii_case(default))
        {
            self.parameters.remove(name);
        }
    }

    pub(crate) fn with_fetcher(mut self, name: &str) -> Self {
        self.fetcher = Some(name.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_attributes_are_equivalent() {
        let url = Url::parse("http://wiki.test/fetch?fetcher=svg&media=wiki:logo.svg&w=20&cache=recache&tseed=9")
            .expect("url");
        let from_url = FetchRequest::from_url(&url).expect("from url");
        let from_attributes = FetchRequest::from_attributes([
            ("src", "wiki/logo.svg"),
            ("fetcher", "svg"),
            ("width", "20"),
            ("cache", "recache"),
        ])
        .expect("from attributes");

        assert_eq!(from_url, from_attributes);
        assert_eq!(from_url.identity().canonical(), "media:wiki:logo.svg");
        assert_eq!(from_url.cache_mode(), CacheMode::ReCache);
        assert_eq!(from_url.parameters().get(BUSTER), None);
    }

    #[test]
    fn missing_identifier_is_a_bad_argument() {
        let err = FetchRequest::from_attributes([("fetcher", "svg"), ("width", "10")])
            .expect_err("id is mandatory");
        assert!(matches!(err, FetchError::BadArgument { ref parameter, .. } if parameter == "id"));
    }

    #[test]
    fn default_cache_mode_is_dropped() {
        let request = FetchRequest::from_attributes([("id", "foo"), ("cache", "cache")])
            .expect("request");
        assert!(request.parameters().is_empty());
        assert_eq!(request.cache_mode(), CacheMode::Cache);
    }

    #[test]
    fn drive_defaults_follow_the_fetcher() {
        let page = FetchRequest::from_attributes([("fetcher", "markup"), ("id", "foo")])
            .expect("request");
        assert_eq!(page.identity().canonical(), "page:foo");

        let media = FetchRequest::from_attributes([("id", "foo.png")]).expect("request");
        assert_eq!(media.identity().canonical(), "media:foo.png");
    }

    #[test]
    fn revision_must_be_numeric() {
        let err = FetchRequest::from_attributes([("id", "foo"), ("rev", "yesterday")])
            .expect_err("bad rev");
        assert!(matches!(err, FetchError::BadArgument { .. }));

        let request = FetchRequest::from_attributes([("id", "foo"), ("rev", "12")])
            .expect("request");
        assert_eq!(request.identity().revision(), Some(12));
    }

    #[test]
    fn drop_default_removes_only_matching_values() {
        let mut request = FetchRequest::from_attributes([("id", "foo"), ("mode", "Fragment")])
            .expect("request");
        request.drop_default("mode", "page");
        assert_eq!(request.parameters().get("mode"), Some("Fragment"));
        request.drop_default("mode", "fragment");
        assert_eq!(request.parameters().get("mode"), None);
    }
}
