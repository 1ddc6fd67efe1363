//! Reader/writer collaborators handed to the host application.
//!
//! Both are scoped to the application's folder inside the archive (`{app}/`), so
//! host code names entries relative to it ("greeting.txt", "layers/0.json").
//! The writer remembers every name it touched; the engine carries forward any
//! prior entry the writer neither wrote nor deleted.

use crate::archive::{Archive, ArchiveError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::io::{Cursor, Read, Write};

/// Host-side content (de)serialization invoked by open and save.
#[async_trait]
pub trait ContentHandler: Send + Sync + 'static {
    /// Populate in-memory content from an opened (and already upgraded) package.
    async fn read(&self, reader: &PackageReader<'_>) -> anyhow::Result<()>;

    /// Serialize in-memory content into a new package archive.
    async fn write(&self, writer: &mut PackageWriter<'_>) -> anyhow::Result<()>;
}

fn scoped(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.trim_start_matches('/'))
}

/// Read access to `{app}/...` entries.
pub struct PackageReader<'a> {
    archive: &'a Archive,
    prefix: String,
}

impl<'a> PackageReader<'a> {
    pub fn new(archive: &'a Archive, app: &str) -> Self {
        Self {
            archive,
            prefix: format!("{}/", app),
        }
    }

    /// Byte stream over an entry, or `None` if it does not exist.
    pub fn get_stream(&self, name: &str) -> Option<impl Read + 'a> {
        self.archive
            .get(&scoped(&self.prefix, name))
            .map(|entry| Cursor::new(entry.data.as_slice()))
    }

    pub fn read_bytes(&self, name: &str) -> Option<&'a [u8]> {
        self.archive
            .get(&scoped(&self.prefix, name))
            .map(|entry| entry.data.as_slice())
    }

    pub fn read_string(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.archive.read_string(&scoped(&self.prefix, name))?)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.read_bytes(name) {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        }
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.archive.contains(&scoped(&self.prefix, name))
    }

    /// Immediate children of `dir` ("" for the app root). Sub-directories end in `/`.
    pub fn list_directory(&self, dir: &str) -> Vec<String> {
        let dir = dir.trim_matches('/');
        let base = if dir.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}/", self.prefix, dir)
        };

        let mut children = BTreeSet::new();
        for (name, _) in self.archive.entries_under(&base) {
            let rest = &name[base.len()..];
            match rest.split_once('/') {
                Some((sub, _)) => children.insert(format!("{}/", sub)),
                None => children.insert(rest.to_string()),
            };
        }
        children.into_iter().collect()
    }
}

/// Write access to `{app}/...` entries of an archive being built.
pub struct PackageWriter<'a> {
    archive: &'a mut Archive,
    prefix: String,
    written: BTreeSet<String>,
    deleted: HashSet<String>,
}

impl<'a> PackageWriter<'a> {
    pub fn new(archive: &'a mut Archive, app: &str) -> Self {
        Self {
            archive,
            prefix: format!("{}/", app),
            written: BTreeSet::new(),
            deleted: HashSet::new(),
        }
    }

    fn touch(&mut self, name: &str) -> String {
        let full = scoped(&self.prefix, name);
        self.deleted.remove(&full);
        self.written.insert(full.clone());
        full
    }

    pub fn write_bytes(&mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<(), ArchiveError> {
        let full = self.touch(name);
        self.archive.insert(&full, data)
    }

    pub fn write_string(&mut self, name: &str, text: &str) -> Result<(), ArchiveError> {
        self.write_bytes(name, text.as_bytes())
    }

    pub fn write_json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        self.write_bytes(name, json)?;
        Ok(())
    }

    /// Copy a whole stream into an entry.
    pub fn write_stream(&mut self, name: &str, mut source: impl Read) -> anyhow::Result<()> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        self.write_bytes(name, data)?;
        Ok(())
    }

    /// Open an entry for incremental writing. The entry is truncated first.
    pub fn get_stream(&mut self, name: &str) -> Result<impl Write + '_, ArchiveError> {
        let full = self.touch(name);
        let buffer = self.archive.buffer_mut(&full)?;
        buffer.clear();
        Ok(buffer)
    }

    /// Drop an entry from the new archive, including one that would be carried forward.
    pub fn delete(&mut self, name: &str) {
        let full = scoped(&self.prefix, name);
        self.written.remove(&full);
        self.archive.remove(&full);
        self.deleted.insert(full);
    }

    /// Full archive names written so far.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    pub(crate) fn into_deleted(self) -> HashSet<String> {
        self.deleted
    }
}
