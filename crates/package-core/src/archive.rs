//! In-memory archive codec for package files.
//!
//! A package on disk is a zip container. On open the whole container is copied
//! into an `Archive` (name -> bytes + timestamp) so upgrades and reads never touch
//! the file; on save a fresh `Archive` is encoded back to zip bytes. Entry
//! timestamps survive the round trip, which lets untouched entries be carried
//! forward verbatim.

use chrono::{Datelike, Local, Timelike};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid entry name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Entry '{0}' is not valid UTF-8")]
    NotUtf8(String),

    #[error("Empty archive data")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// A single named entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub data: Vec<u8>,
    pub modified: DateTime,
}

impl ArchiveEntry {
    /// New entry stamped with the current local time.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            modified: now_timestamp(),
        }
    }
}

/// Editable, fully in-memory view of a package container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Archive {
    entries: BTreeMap<String, ArchiveEntry>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a zip container. Directory records are skipped; only files are entries.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();

        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let modified = file.last_modified().unwrap_or_default();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.insert(name, ArchiveEntry { data, modified });
        }

        Ok(Self { entries })
    }

    /// Encode as a deflated zip container, preserving entry timestamps.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (name, entry) in &self.entries {
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(entry.modified);
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Read an entry as UTF-8 text. `Ok(None)` when the entry is absent.
    pub fn read_string(&self, name: &str) -> Result<Option<String>> {
        match self.entries.get(name) {
            None => Ok(None),
            Some(entry) => String::from_utf8(entry.data.clone())
                .map(Some)
                .map_err(|_| ArchiveError::NotUtf8(name.to_string())),
        }
    }

    /// Insert or replace an entry, stamping it with the current time.
    pub fn insert(&mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        validate_entry_name(name)?;
        self.entries
            .insert(name.to_string(), ArchiveEntry::new(data.into()));
        Ok(())
    }

    /// Insert an entry verbatim, keeping its timestamp.
    pub fn insert_entry(&mut self, name: &str, entry: ArchiveEntry) -> Result<()> {
        validate_entry_name(name)?;
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Insert an entry taken from a decoded archive, name and timestamp as they were.
    ///
    /// Other tools may write names `validate_entry_name` rejects; such entries
    /// still round-trip untouched.
    pub(crate) fn insert_decoded(&mut self, name: &str, entry: ArchiveEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    /// Mutable access to an entry's buffer, creating an empty entry if needed.
    pub(crate) fn buffer_mut(&mut self, name: &str) -> Result<&mut Vec<u8>> {
        validate_entry_name(name)?;
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| ArchiveEntry::new(Vec::new()));
        entry.modified = now_timestamp();
        Ok(&mut entry.data)
    }

    pub fn remove(&mut self, name: &str) -> Option<ArchiveEntry> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries whose name starts with `prefix` (no separator is implied).
    pub fn entries_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ArchiveEntry)> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reject names that would escape the container or collide with directory records.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(ArchiveError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("empty name");
    }
    if name.starts_with('/') || name.contains('\\') {
        return invalid("must be a relative '/'-separated path");
    }
    if name.ends_with('/') {
        return invalid("names a directory");
    }
    if name.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return invalid("contains an empty or '..' segment");
    }
    Ok(())
}

/// Current local time as a zip timestamp. Zip cannot represent years before 1980.
pub fn now_timestamp() -> DateTime {
    let now = Local::now();
    DateTime::from_date_and_time(
        u16::try_from(now.year()).unwrap_or(1980),
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}
