//! Typed request parameters shared by URL and tag-attribute construction.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::error::FetchError;

pub const FETCHER: &str = "fetcher";
pub const ID: &str = "id";
pub const DRIVE: &str = "drive";
pub const REV: &str = "rev";
pub const CACHE: &str = "cache";
pub const BUSTER: &str = "tseed";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const COLOR: &str = "color";
pub const MODE: &str = "mode";

/// Alternative spellings accepted from URLs and markup attributes.
const ALIASES: &[(&str, &str)] = &[
    ("w", WIDTH),
    ("h", HEIGHT),
    ("media", ID),
    ("src", ID),
    ("wiki-id", ID),
    ("buster", BUSTER),
    ("fill", COLOR),
];

/// Parameters carried by the identity or the fetcher name, never repeated in a key.
const IDENTITY_PARAMETERS: &[&str] = &[FETCHER, ID, DRIVE, REV];

/// Parameters that do not affect output and therefore never enter a cache key.
const KEY_EXCLUDED_PARAMETERS: &[&str] = &[CACHE, BUSTER];

/// Translate a raw parameter name into its canonical spelling.
pub fn canonical_name(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(lowered)
}

/// Requested cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Never expires by age; only dependency changes invalidate.
    #[default]
    Cache,
    /// Always stale.
    NoCache,
    /// Expires after the configured site cache interval.
    ReCache,
}

impl CacheMode {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "cache" => Ok(Self::Cache),
            "nocache" => Ok(Self::NoCache),
            "recache" => Ok(Self::ReCache),
            other => Err(FetchError::bad_argument(
                CACHE,
                format!("`{other}` is not one of cache, nocache, recache"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::NoCache => "nocache",
            Self::ReCache => "recache",
        }
    }

    /// Maximum entry age for this mode; `None` means no age limit.
    pub fn max_age(self, recache_interval: Duration) -> Option<Duration> {
        match self {
            Self::Cache => None,
            Self::NoCache => Some(Duration::ZERO),
            Self::ReCache => Some(recache_interval),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised name → value mapping of every output-affecting request attribute.
///
/// Names are canonicalised on insertion, so `w=10` and `width=10` are the same
/// parameter. Iteration is in name order regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestParameters {
    values: BTreeMap<String, String>,
}

impl RequestParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw pairs; later duplicates win and blank names are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (name, value) in pairs {
            params.insert(name.as_ref(), value);
        }
        params
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        let name = canonical_name(name);
        if name.is_empty() {
            return None;
        }
        self.values.insert(name, value.into().trim().to_string())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&canonical_name(name)).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(&canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&canonical_name(name))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parameters that participate in a cache key, in name order.
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(name, _)| {
            !KEY_EXCLUDED_PARAMETERS.contains(name) && !IDENTITY_PARAMETERS.contains(name)
        })
    }

    pub fn cache_mode(&self) -> Result<CacheMode, FetchError> {
        self.get(CACHE)
            .map(CacheMode::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    /// Parse an optional positive dimension (`width`, `height`, ...).
    pub fn positive_u32(&self, name: &str) -> Result<Option<u32>, FetchError> {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };
        match raw.parse::<u32>() {
            Ok(0) | Err(_) => Err(FetchError::bad_argument(
                name,
                format!("`{raw}` is not a positive integer"),
            )),
            Ok(value) => Ok(Some(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let params = RequestParameters::from_pairs([("W", "10"), ("h", "20"), ("fill", "red")]);
        assert_eq!(params.get("width"), Some("10"));
        assert_eq!(params.get("w"), Some("10"));
        assert_eq!(params.get(HEIGHT), Some("20"));
        assert_eq!(params.get(COLOR), Some("red"));
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let a = RequestParameters::from_pairs([("width", "10"), ("color", "red")]);
        let b = RequestParameters::from_pairs([("fill", "red"), ("w", "10")]);
        assert_eq!(a, b);
    }

    #[test]
    fn key_pairs_skip_excluded_and_identity_names() {
        let params = RequestParameters::from_pairs([
            ("id", "logo.svg"),
            ("drive", "media"),
            ("cache", "nocache"),
            ("tseed", "abc"),
            ("width", "10"),
        ]);
        let pairs: Vec<_> = params.key_pairs().collect();
        assert_eq!(pairs, vec![("width", "10")]);
    }

    #[test]
    fn cache_mode_parsing() {
        assert_eq!(
            RequestParameters::new().cache_mode().expect("default"),
            CacheMode::Cache
        );
        let params = RequestParameters::from_pairs([("cache", "NoCache")]);
        assert_eq!(params.cache_mode().expect("nocache"), CacheMode::NoCache);
        let params = RequestParameters::from_pairs([("cache", "sometimes")]);
        assert!(params.cache_mode().is_err());
    }

    #[test]
    fn max_age_per_mode() {
        let interval = Duration::from_secs(3600);
        assert_eq!(CacheMode::Cache.max_age(interval), None);
        assert_eq!(CacheMode::NoCache.max_age(interval), Some(Duration::ZERO));
        assert_eq!(CacheMode::ReCache.max_age(interval), Some(interval));
    }

    #[test]
    fn positive_dimensions() {
        let params = RequestParameters::from_pairs([("w", "120"), ("h", "0"), ("ratio", "x")]);
        assert_eq!(params.positive_u32(WIDTH).expect("width"), Some(120));
        assert!(params.positive_u32(HEIGHT).is_err());
        assert_eq!(params.positive_u32("depth").expect("absent"), None);
    }
}
