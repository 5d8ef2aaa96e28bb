//! Request-scoped cache report.
//!
//! Records, per (fragment, render mode) observed during one request, whether
//! the output came from the store or was freshly generated. Never persisted.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// How a fetch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Served from a usable store entry.
    Hit,
    /// Generated and (when possible) written to the store.
    Miss,
    /// Generated without touching the store.
    Bypass,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub fragment: String,
    pub mode: String,
    pub fetcher: &'static str,
    pub outcome: CacheOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Default)]
pub struct CacheManager {
    slots: BTreeMap<(String, String), SlotReport>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation; a later observation of the same pair replaces the earlier one.
    pub fn record(
        &mut self,
        fragment: impl Into<String>,
        mode: impl Into<String>,
        fetcher: &'static str,
        outcome: CacheOutcome,
        key: Option<&str>,
        modified: Option<SystemTime>,
    ) {
        let fragment = fragment.into();
        let mode = mode.into();
        let report = SlotReport {
            fragment: fragment.clone(),
            mode: mode.clone(),
            fetcher,
            outcome,
            key: key.map(str::to_string),
            modified: modified.and_then(format_time),
        };
        self.slots.insert((fragment, mode), report);
    }

    pub fn get(&self, fragment: &str, mode: &str) -> Option<&SlotReport> {
        self.slots.get(&(fragment.to_string(), mode.to_string()))
    }

    pub fn reports(&self) -> impl Iterator<Item = &SlotReport> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "slots": self.slots.values().collect::<Vec<_>>(),
        })
    }

    /// Diagnostic data block for embedding in rendered output.
    pub fn to_html_block(&self) -> String {
        let json = self.to_json().to_string().replace("</", "<\\/");
        format!("<script type=\"application/json\" id=\"wikifetch-cache-report\">{json}</script>")
    }
}

fn format_time(time: SystemTime) -> Option<String> {
    OffsetDateTime::from(time).format(&Rfc3339).ok()
}
