//! Read-only summary of a package file, for tooling.
//!
//! Works without a content handler or upgrade chain: it only decodes the
//! container, the version entries and the changelog, and never takes the lock.

use crate::archive::Archive;
use crate::changelog::{parse_changelog, ChangelogEntry, CHANGELOG_ENTRY};
use crate::lock::{is_locked, LockDescriptor};
use crate::package::VERSION_ENTRY;
use crate::version::Version;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub name: String,
    pub version: Version,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub name: String,
    pub size: usize,
    /// Zip timestamp, `YYYY-MM-DD HH:MM:SS` local time.
    pub modified: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSummary {
    pub path: PathBuf,
    pub package_version: Version,
    /// Every application folder carrying a `version` entry.
    pub applications: Vec<ApplicationSummary>,
    /// Changelog of the selected application, empty if none could be selected.
    pub changelog: Vec<ChangelogEntry>,
    pub entries: Vec<EntrySummary>,
    pub lock: Option<LockDescriptor>,
    pub has_backup: bool,
    pub has_auto_save: bool,
}

/// Summarize the package at `path`.
///
/// `app` selects whose changelog to read; without it the only application
/// folder is used.
pub async fn summarize(path: &Path, app: Option<&str>) -> Result<PackageSummary> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let archive = Archive::from_bytes(&bytes)
        .with_context(|| format!("{} is not a package archive", path.display()))?;

    let package_version = match archive.read_string(VERSION_ENTRY)? {
        Some(raw) => raw.trim().parse()?,
        None => Version::ZERO,
    };

    let mut applications = Vec::new();
    for name in archive.names() {
        let Some(folder) = name.strip_suffix("/version") else {
            continue;
        };
        if folder.contains('/') {
            continue;
        }
        let version = archive
            .read_string(name)?
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("Bad version in {}", name))?;
        applications.push(ApplicationSummary {
            name: folder.to_string(),
            version,
        });
    }

    let selected = match app {
        Some(app) => {
            if !applications.iter().any(|a| a.name == app) {
                bail!("{} has no application folder '{}'", path.display(), app);
            }
            Some(app.to_string())
        }
        None if applications.len() == 1 => Some(applications[0].name.clone()),
        None => None,
    };
    let changelog = selected
        .and_then(|app| archive.get(&format!("{}/{}", app, CHANGELOG_ENTRY)))
        .map(|entry| parse_changelog(&entry.data))
        .unwrap_or_default();

    let entries = archive
        .entries_under("")
        .map(|(name, entry)| EntrySummary {
            name: name.to_string(),
            size: entry.data.len(),
            modified: format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                entry.modified.year(),
                entry.modified.month(),
                entry.modified.day(),
                entry.modified.hour(),
                entry.modified.minute(),
                entry.modified.second()
            ),
        })
        .collect();

    Ok(PackageSummary {
        path: path.to_path_buf(),
        package_version,
        applications,
        changelog,
        entries,
        lock: is_locked(path),
        has_backup: crate::package::with_suffix(path, ".bak").exists(),
        has_auto_save: crate::package::with_suffix(path, ".autosave").exists(),
    })
}
