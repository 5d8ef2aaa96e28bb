//! Dependency tracking for cache invalidation.
//!
//! Generation records every external fact it consulted (source files, config
//! files and values, the requested page, runtime slots, nested fragments) in a
//! [`DependencyTracker`]. The resulting [`DependencyManifest`] is persisted next
//! to the entry and re-resolved in full on every freshness check.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::keys::hash_value;

/// What a dependency reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// A source file; reference is its path.
    File,
    /// A site configuration file; reference is its path.
    Config,
    /// A named configuration value.
    ConfigValue,
    /// Whichever page the current request targets.
    RequestedPage,
    /// A runtime slot (e.g. `sidebar`) resolved against the requested page.
    RuntimeSlot,
    /// Another cached fragment; reference is its cache key.
    Fragment,
}

impl DependencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Config => "config",
            Self::ConfigValue => "config_value",
            Self::RequestedPage => "requested_page",
            Self::RuntimeSlot => "runtime_slot",
            Self::Fragment => "fragment",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known state of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChangeMarker {
    /// Modification time in nanoseconds since the unix epoch.
    Modified(i128),
    /// Content digest of a value.
    Digest(String),
    /// The dependency did not exist.
    Absent,
}

impl ChangeMarker {
    pub fn modified(time: SystemTime) -> Self {
        Self::Modified(unix_nanos(time))
    }

    pub fn digest_of(value: &str) -> Self {
        Self::Digest(hash_value(value))
    }
}

pub(crate) fn unix_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub reference: String,
    pub marker: ChangeMarker,
}

/// Ordered list of dependencies recorded for one cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest {
    dependencies: Vec<Dependency>,
}

impl DependencyManifest {
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, kind: DependencyKind, reference: &str) -> bool {
        self.dependencies
            .iter()
            .any(|dep| dep.kind == kind && dep.reference == reference)
    }

    /// First dependency whose current marker differs from the recorded one.
    ///
    /// Every call re-resolves through `resolver`; nothing from a previous check is reused.
    pub fn first_stale(&self, resolver: &dyn DependencyResolver) -> Option<&Dependency> {
        self.dependencies.iter().find(|dep| {
            let current = resolver.current_marker(dep.kind, &dep.reference);
            let changed = current != dep.marker;
            if changed {
                debug!(
                    op = "deps::first_stale",
                    kind = %dep.kind,
                    reference = %dep.reference,
                    recorded = ?dep.marker,
                    current = ?current,
                    "dependency changed"
                );
            }
            changed
        })
    }

    pub fn is_still_valid(&self, resolver: &dyn DependencyResolver) -> bool {
        self.first_stale(resolver).is_none()
    }
}

impl FromIterator<Dependency> for DependencyManifest {
    fn from_iter<T: IntoIterator<Item = Dependency>>(iter: T) -> Self {
        Self {
            dependencies: iter.into_iter().collect(),
        }
    }
}

/// Resolves a dependency reference to its current change marker.
///
/// Implemented by the request context, which consults the host collaborators
/// (filesystem, configuration, requested page) at call time.
pub trait DependencyResolver {
    fn current_marker(&self, kind: DependencyKind, reference: &str) -> ChangeMarker;
}

/// Accumulates dependencies while an entry is being generated.
///
/// Markers are resolved when a dependency is added, i.e. before the generator
/// reads the dependency, so a change racing with generation invalidates the entry.
pub struct DependencyTracker<'a> {
    resolver: &'a dyn DependencyResolver,
    entries: BTreeMap<(DependencyKind, String), ChangeMarker>,
}

impl<'a> DependencyTracker<'a> {
    pub fn new(resolver: &'a dyn DependencyResolver) -> Self {
        Self {
            resolver,
            entries: BTreeMap::new(),
        }
    }

    /// Record a dependency, resolving its marker now. Re-adding keeps the first marker.
    pub fn add_dependency(&mut self, kind: DependencyKind, reference: impl Into<String>) {
        let reference = reference.into();
        if self.entries.contains_key(&(kind, reference.clone())) {
            return;
        }
        let marker = self.resolver.current_marker(kind, &reference);
        self.entries.insert((kind, reference), marker);
    }

    /// Record a dependency whose marker is already known (e.g. a nested fragment).
    pub fn add_resolved(&mut self, dependency: Dependency) {
        self.entries
            .entry((dependency.kind, dependency.reference))
            .or_insert(dependency.marker);
    }

    /// Fold in another manifest, keeping its recorded markers.
    pub fn extend(&mut self, manifest: &DependencyManifest) {
        for dependency in manifest.iter() {
            self.add_resolved(dependency.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_dependencies(&self) -> DependencyManifest {
        self.entries
            .iter()
            .map(|((kind, reference), marker)| Dependency {
                kind: *kind,
                reference: reference.clone(),
                marker: marker.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeResolver {
        markers: RefCell<HashMap<(DependencyKind, String), ChangeMarker>>,
        calls: RefCell<usize>,
    }

    impl FakeResolver {
        fn set(&self, kind: DependencyKind, reference: &str, marker: ChangeMarker) {
            self.markers
                .borrow_mut()
                .insert((kind, reference.to_string()), marker);
        }
    }

    impl DependencyResolver for FakeResolver {
        fn current_marker(&self, kind: DependencyKind, reference: &str) -> ChangeMarker {
            *self.calls.borrow_mut() += 1;
            self.markers
                .borrow()
                .get(&(kind, reference.to_string()))
                .cloned()
                .unwrap_or(ChangeMarker::Absent)
        }
    }

    #[test]
    fn tracker_resolves_markers_on_add() {
        let resolver = FakeResolver::default();
        resolver.set(DependencyKind::File, "/src/foo.txt", ChangeMarker::Modified(10));

        let mut tracker = DependencyTracker::new(&resolver);
        tracker.add_dependency(DependencyKind::File, "/src/foo.txt");
        resolver.set(DependencyKind::File, "/src/foo.txt", ChangeMarker::Modified(20));
        tracker.add_dependency(DependencyKind::File, "/src/foo.txt");

        let manifest = tracker.get_dependencies();
        assert_eq!(manifest.len(), 1);
        let dep = manifest.iter().next().expect("dependency");
        assert_eq!(dep.marker, ChangeMarker::Modified(10));
        assert!(!manifest.is_still_valid(&resolver));
    }

    #[test]
    fn every_kind_invalidates_on_change() {
        let kinds = [
            DependencyKind::File,
            DependencyKind::Config,
            DependencyKind::ConfigValue,
            DependencyKind::RequestedPage,
            DependencyKind::RuntimeSlot,
            DependencyKind::Fragment,
        ];
        for kind in kinds {
            let resolver = FakeResolver::default();
            resolver.set(kind, "ref", ChangeMarker::digest_of("one"));
            let mut tracker = DependencyTracker::new(&resolver);
            tracker.add_dependency(kind, "ref");
            let manifest = tracker.get_dependencies();
            assert!(manifest.is_still_valid(&resolver), "{kind} fresh");

            resolver.set(kind, "ref", ChangeMarker::digest_of("two"));
            assert!(!manifest.is_still_valid(&resolver), "{kind} stale");
        }
    }

    #[test]
    fn validity_is_re_resolved_on_every_check() {
        let resolver = FakeResolver::default();
        resolver.set(DependencyKind::ConfigValue, "a", ChangeMarker::digest_of("x"));
        resolver.set(DependencyKind::ConfigValue, "b", ChangeMarker::digest_of("y"));
        let mut tracker = DependencyTracker::new(&resolver);
        tracker.add_dependency(DependencyKind::ConfigValue, "a");
        tracker.add_dependency(DependencyKind::ConfigValue, "b");
        let manifest = tracker.get_dependencies();

        *resolver.calls.borrow_mut() = 0;
        assert!(manifest.is_still_valid(&resolver));
        assert!(manifest.is_still_valid(&resolver));
        assert_eq!(*resolver.calls.borrow(), 4);
    }

    #[test]
    fn extend_keeps_recorded_markers() {
        let resolver = FakeResolver::default();
        let nested: DependencyManifest = [Dependency {
            kind: DependencyKind::File,
            reference: "/src/sidebar.txt".to_string(),
            marker: ChangeMarker::Modified(5),
        }]
        .into_iter()
        .collect();

        let mut tracker = DependencyTracker::new(&resolver);
        tracker.extend(&nested);
        let manifest = tracker.get_dependencies();
        assert!(manifest.contains(DependencyKind::File, "/src/sidebar.txt"));
        assert_eq!(
            manifest.iter().next().map(|dep| dep.marker.clone()),
            Some(ChangeMarker::Modified(5))
        );
    }

    #[test]
    fn manifest_serialises_as_tagged_list() {
        let manifest: DependencyManifest = [Dependency {
            kind: DependencyKind::RuntimeSlot,
            reference: "sidebar".to_string(),
            marker: ChangeMarker::Absent,
        }]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&manifest).expect("json");
        assert_eq!(
            json,
            serde_json::json!([
                {"kind": "runtime_slot", "reference": "sidebar", "marker": {"type": "absent"}}
            ])
        );
        let back: DependencyManifest = serde_json::from_value(json).expect("parse");
        assert_eq!(back, manifest);
    }
}
