#![allow(dead_code)]

use async_trait::async_trait;
use package_core::{
    Archive, ContentHandler, Package, PackageEvent, PackageOptions, PackageReader, PackageWriter,
    Subscription, UserIdentity, Version,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const APP: &str = "app";

/// Content handler keeping its content as a flat map of `{app}/`-relative files.
#[derive(Default)]
pub struct MapHandler {
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_read: AtomicBool,
    pub fail_write: AtomicBool,
    pub reads: AtomicUsize,
}

impl MapHandler {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let handler = Self::default();
        for (name, text) in files {
            handler.set(name, text.as_bytes());
        }
        handler
    }

    pub fn set(&self, name: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }

    pub fn remove(&self, name: &str) {
        self.files.lock().unwrap().remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ContentHandler for MapHandler {
    async fn read(&self, reader: &PackageReader<'_>) -> anyhow::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.load(Ordering::SeqCst) {
            anyhow::bail!("reader refused the package");
        }

        let mut files = BTreeMap::new();
        let mut dirs = vec![String::new()];
        while let Some(dir) = dirs.pop() {
            for child in reader.list_directory(&dir) {
                let full = if dir.is_empty() {
                    child.clone()
                } else {
                    format!("{}/{}", dir, child)
                };
                if let Some(sub) = full.strip_suffix('/') {
                    dirs.push(sub.to_string());
                    continue;
                }
                if full == "version" || full == "changelog.json" {
                    continue;
                }
                let data = reader.read_bytes(&full).unwrap_or_default().to_vec();
                files.insert(full, data);
            }
        }

        *self.files.lock().unwrap() = files;
        Ok(())
    }

    async fn write(&self, writer: &mut PackageWriter<'_>) -> anyhow::Result<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            anyhow::bail!("writer refused the package");
        }

        let files = self.files.lock().unwrap().clone();
        for (name, data) in files {
            writer.write_bytes(&name, data)?;
        }
        let deletes = self.deletes.lock().unwrap().clone();
        for name in deletes {
            writer.delete(&name);
        }
        Ok(())
    }
}

pub fn identity(name: &str) -> UserIdentity {
    UserIdentity {
        username: name.to_string(),
        computer_name: "test-host".to_string(),
    }
}

pub fn options(user: &str) -> PackageOptions {
    PackageOptions::new(APP, Version::new(1, 0, 0)).with_identity(identity(user))
}

pub fn package(files: &[(&str, &str)]) -> Package<MapHandler> {
    Package::new(MapHandler::with_files(files), options("ada"))
}

/// Write a package file directly from `(name, text)` entries.
pub fn write_raw(path: &Path, entries: &[(&str, &str)]) {
    let mut archive = Archive::new();
    for (name, text) in entries {
        archive.insert(name, text.as_bytes()).unwrap();
    }
    std::fs::write(path, archive.to_bytes().unwrap()).unwrap();
}

pub fn read_raw(path: &Path) -> Archive {
    Archive::from_bytes(&std::fs::read(path).unwrap()).unwrap()
}

pub fn record_events<H: ContentHandler>(
    package: &Package<H>,
) -> (Arc<Mutex<Vec<PackageEvent>>>, Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = package.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    (events, subscription)
}
