//! Path/MIME resolution: drive + wiki path (+ revision) to a file and its MIME type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{Drive, FetchError, ResourceIdentity};

/// MIME reported for markup drive sources.
pub const MARKUP_MIME: &str = "text/x-wiki";
const MARKUP_EXTENSION: &str = "txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveKind {
    /// Files addressed verbatim (`wiki:logo.svg` → `wiki/logo.svg`).
    Media,
    /// Pages stored as markup text (`wiki:start` → `wiki/start.txt`).
    Markup,
}

#[derive(Debug, Clone)]
pub struct DriveSpec {
    pub name: Drive,
    pub kind: DriveKind,
    pub root: PathBuf,
    /// Directory holding old revisions, as `stem.REV.ext`.
    pub attic: Option<PathBuf>,
}

/// A resolved source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: PathBuf,
    pub kind: DriveKind,
    /// `None` when the extension maps to no known MIME type.
    pub mime: Option<String>,
}

impl ResolvedSource {
    /// Preferred file extension for content derived from this source's MIME type.
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin")
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriveTable {
    drives: BTreeMap<Drive, DriveSpec>,
}

impl DriveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `media` and `page` drives below `root` (`root/media`, `root/pages`).
    pub fn with_defaults(root: &Path) -> Self {
        default_drives(root).into_iter().collect()
    }

    pub fn insert(&mut self, spec: DriveSpec) -> Option<DriveSpec> {
        self.drives.insert(spec.name.clone(), spec)
    }

    pub fn get(&self, drive: &Drive) -> Option<&DriveSpec> {
        self.drives.get(drive)
    }

    pub fn resolve(&self, identity: &ResourceIdentity) -> Result<ResolvedSource, FetchError> {
        let spec = self
            .get(identity.drive())
            .ok_or_else(|| FetchError::not_found(format!("drive `{}`", identity.drive())))?;

        let mut relative = identity.path().to_relative_path();
        if spec.kind == DriveKind::Markup {
            // Appended, not substituted: `v1.2` lives in `v1.2.txt`.
            relative.set_file_name(format!("{}.{MARKUP_EXTENSION}", identity.path().name()));
        }

        let path = match identity.revision() {
            None => spec.root.join(&relative),
            Some(revision) => {
                let attic = spec.attic.as_ref().ok_or_else(|| {
                    FetchError::not_found(format!(
                        "revision {revision} of `{identity}` (drive has no attic)"
                    ))
                })?;
                attic.join(revision_file_name(&relative, revision))
            }
        };

        let mime = match spec.kind {
            DriveKind::Markup => Some(MARKUP_MIME.to_string()),
            DriveKind::Media => mime_for(&relative),
        };

        Ok(ResolvedSource {
            path,
            kind: spec.kind,
            mime,
        })
    }
}

impl FromIterator<DriveSpec> for DriveTable {
    fn from_iter<I: IntoIterator<Item = DriveSpec>>(iter: I) -> Self {
        let mut table = Self::new();
        for spec in iter {
            table.insert(spec);
        }
        table
    }
}

/// The standard wiki layout below a data directory.
pub fn default_drives(root: &Path) -> Vec<DriveSpec> {
    vec![
        DriveSpec {
            name: Drive::media(),
            kind: DriveKind::Media,
            root: root.join("media"),
            attic: Some(root.join("media_attic")),
        },
        DriveSpec {
            name: Drive::page(),
            kind: DriveKind::Markup,
            root: root.join("pages"),
            attic: Some(root.join("attic")),
        },
    ]
}

/// MIME type from the file extension; `None` when unknown.
pub fn mime_for(path: &Path) -> Option<String> {
    path.extension()?;
    mime_guess::from_path(path)
        .first_raw()
        .map(str::to_string)
}

fn revision_file_name(relative: &Path, revision: u64) -> PathBuf {
    let stem = relative
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match relative.extension() {
        Some(ext) => format!("{stem}.{revision}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{revision}"),
    };
    relative.with_file_name(name)
}
