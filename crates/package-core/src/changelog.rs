//! Audit trail stored at `{app}/changelog.json`.

use crate::options::UserIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the changelog inside the application folder.
pub const CHANGELOG_ENTRY: &str = "changelog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangelogType {
    Save,
    AutoSave,
    PackageUpgrade,
    ApplicationUpgrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    #[serde(rename = "type")]
    pub kind: ChangelogType,
    pub username: String,
    pub computer_name: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
}

impl ChangelogEntry {
    pub fn new(kind: ChangelogType, identity: &UserIdentity, note: impl Into<String>) -> Self {
        Self {
            kind,
            username: identity.username.clone(),
            computer_name: identity.computer_name.clone(),
            time: Utc::now(),
            note: note.into(),
        }
    }
}

/// Parse a stored changelog. A malformed log yields an empty one; it is audit
/// data and must never block opening the document.
pub fn parse_changelog(raw: &[u8]) -> Vec<ChangelogEntry> {
    match serde_json::from_slice(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable changelog");
            Vec::new()
        }
    }
}

pub fn serialize_changelog(entries: &[ChangelogEntry]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(entries)
}
