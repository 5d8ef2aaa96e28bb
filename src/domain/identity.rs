//! Resource identities: which drive a fetchable thing lives on, where, and at which revision.

use std::fmt;
use std::path::PathBuf;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use super::error::FetchError;

/// Namespace prefix naming the backing store of an identity (e.g. `media`, `page`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Drive(String);

impl Drive {
    pub const MEDIA: &'static str = "media";
    pub const PAGE: &'static str = "page";
    pub const CACHE: &'static str = "cache";

    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(FetchError::bad_argument("drive", "drive name must not be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FetchError::bad_argument(
                "drive",
                format!("`{raw}` is not a valid drive name"),
            ));
        }
        Ok(Self(name))
    }

    pub fn media() -> Self {
        Self(Self::MEDIA.to_string())
    }

    pub fn page() -> Self {
        Self(Self::PAGE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalised wiki path: segments joined with `:`.
///
/// Accepts `:` or `/` as separators, strips leading and trailing separators, and
/// rejects empty, `.` and `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WikiPath(String);

impl WikiPath {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let segments: Vec<&str> = raw
            .trim()
            .split([':', '/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect();

        if segments.is_empty() {
            return Err(FetchError::bad_argument("id", "identifier must not be empty"));
        }
        if let Some(bad) = segments
            .iter()
            .find(|segment| matches!(**segment, "." | ".."))
        {
            return Err(FetchError::bad_argument(
                "id",
                format!("segment `{bad}` is not allowed in `{raw}`"),
            ));
        }

        Ok(Self(segments.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    /// Last segment (the file or page name).
    pub fn name(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or(&self.0)
    }

    /// Namespace segments above the name, outermost first.
    pub fn namespace(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.segments().collect();
        segments.pop();
        segments
    }

    pub fn to_relative_path(&self) -> PathBuf {
        self.segments().collect()
    }

    /// Sibling of this path's namespace with the given name.
    pub fn sibling(&self, namespace: &[&str], name: &str) -> Self {
        let mut segments: Vec<&str> = namespace.to_vec();
        segments.push(name);
        Self(segments.join(":"))
    }
}

impl fmt::Display for WikiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path bytes escaped in the canonical form: the revision and key separators.
const CANONICAL_PATH_RESERVED: &AsciiSet = &CONTROLS.add(b'%').add(b'@').add(b'&');

/// Revision marker (a unix timestamp, as stored in the wiki's attic).
pub type Revision = u64;

/// Immutable identity of a fetchable source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    drive: Drive,
    path: WikiPath,
    revision: Option<Revision>,
}

impl ResourceIdentity {
    pub fn new(drive: Drive, path: WikiPath) -> Self {
        Self {
            drive,
            path,
            revision: None,
        }
    }

    pub fn parse(drive: &str, path: &str) -> Result<Self, FetchError> {
        Ok(Self::new(Drive::parse(drive)?, WikiPath::parse(path)?))
    }

    /// Parse the form produced by [`ResourceIdentity::canonical`].
    pub fn from_canonical(canonical: &str) -> Result<Self, FetchError> {
        let (drive, rest) = canonical.split_once(':').ok_or_else(|| {
            FetchError::bad_argument("id", format!("`{canonical}` has no drive prefix"))
        })?;
        let (path, revision) = match rest.rsplit_once('@') {
            Some((path, rev)) => {
                let rev = rev.parse::<Revision>().map_err(|_| {
                    FetchError::bad_argument("rev", format!("`{rev}` is not a revision timestamp"))
                })?;
                (path, Some(rev))
            }
            None => (rest, None),
        };
        let path = percent_decode_str(path).decode_utf8().map_err(|_| {
            FetchError::bad_argument("id", format!("`{canonical}` is not valid UTF-8"))
        })?;
        Ok(Self::parse(drive, &path)?.with_revision(revision))
    }

    pub fn with_revision(mut self, revision: Option<Revision>) -> Self {
        self.revision = revision;
        self
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub fn path(&self) -> &WikiPath {
        &self.path
    }

    pub fn revision(&self) -> Option<Revision> {
        self.revision
    }

    /// Stable textual form: `drive:path` with an optional `@revision` suffix.
    ///
    /// `%`, `@` and `&` inside the path are percent-encoded, so the form stays
    /// unambiguous when a revision or key parameters follow it.
    pub fn canonical(&self) -> String {
        let path = utf8_percent_encode(self.path.as_str(), CANONICAL_PATH_RESERVED);
        match self.revision {
            Some(rev) => format!("{}:{path}@{rev}", self.drive),
            None => format!("{}:{path}", self.drive),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
