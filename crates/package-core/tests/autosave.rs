mod common;

use common::{package, read_raw, record_events};
use package_core::changelog::parse_changelog;
use package_core::{CancellationToken, ChangelogType, PackageEvent};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn stored_changelog(path: &std::path::Path) -> Vec<package_core::ChangelogEntry> {
    let archive = read_raw(path);
    parse_changelog(&archive.get("app/changelog.json").unwrap().data)
}

#[tokio::test]
async fn test_immediate_snapshot_leaves_canonical_file_alone() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();
    let canonical = std::fs::read(&path).unwrap();

    doc.handler().set("text.txt", b"v2");
    doc.set_content_modified(true);
    let (events, _subscription) = record_events(&doc);

    doc.configure_auto_save(Some(Duration::ZERO), None, true)
        .await
        .unwrap();

    let snapshot = doc.auto_save_path();
    assert_eq!(snapshot, temp_dir.path().join("doc.pkg.autosave"));
    assert_eq!(
        read_raw(&snapshot).read_string("app/text.txt").unwrap().as_deref(),
        Some("v2")
    );
    assert_eq!(std::fs::read(&path).unwrap(), canonical);
    assert!(doc.is_content_modified());
    assert!(!doc.is_modified_since_auto_save());
    assert_eq!(doc.path(), Some(path.clone()));

    let kinds: Vec<_> = stored_changelog(&snapshot).iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangelogType::Save, ChangelogType::AutoSave]);
    assert_eq!(doc.changelog().len(), 1);

    assert_eq!(
        *events.lock().unwrap(),
        vec![PackageEvent::AutoSaved { path: snapshot }]
    );
}

#[tokio::test]
async fn test_snapshot_requires_a_change_since_the_last_one() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();

    // Freshly saved: nothing to snapshot.
    assert!(!doc.auto_save_now().await.unwrap());
    assert!(!doc.auto_save_path().exists());

    doc.set_content_modified(true);
    assert!(doc.auto_save_now().await.unwrap());
    assert!(!doc.auto_save_now().await.unwrap());

    doc.handler().set("text.txt", b"v3");
    doc.set_content_modified(true);
    assert!(doc.auto_save_now().await.unwrap());
    assert_eq!(
        read_raw(&doc.auto_save_path())
            .read_string("app/text.txt")
            .unwrap()
            .as_deref(),
        Some("v3")
    );
}

#[tokio::test]
async fn test_periodic_timer_writes_snapshots() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
    let _subscription = doc.subscribe(move |event| {
        if let PackageEvent::AutoSaved { path } = event {
            let _ = tx.send(path.clone());
        }
    });

    doc.configure_auto_save(
        Some(Duration::from_millis(20)),
        Some(Duration::from_millis(20)),
        true,
    )
    .await
    .unwrap();
    assert!(doc.auto_save_enabled());

    doc.set_content_modified(true);
    let written = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written, doc.auto_save_path());

    doc.handler().set("text.txt", b"v2");
    doc.set_content_modified(true);
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        read_raw(&written).read_string("app/text.txt").unwrap().as_deref(),
        Some("v2")
    );
}

#[tokio::test]
async fn test_disabling_keeps_schedule_and_stops_timer() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();

    let due = Some(Duration::from_millis(20));
    doc.configure_auto_save(due, due, true).await.unwrap();
    doc.set_auto_save_enabled(false);
    assert!(!doc.auto_save_enabled());
    assert_eq!(doc.auto_save_schedule(), (due, due));

    doc.set_content_modified(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!doc.auto_save_path().exists());
    assert!(doc.is_modified_since_auto_save());
}

#[tokio::test]
async fn test_forced_snapshot_of_unbound_document_uses_temp_dir() {
    let doc = package(&[("text.txt", "draft")]);
    doc.set_content_modified(true);

    doc.configure_auto_save(Some(Duration::ZERO), None, false)
        .await
        .unwrap();

    let snapshot = doc.auto_save_path();
    assert!(snapshot.starts_with(std::env::temp_dir()));
    assert!(snapshot.to_string_lossy().ends_with(".autosave"));
    let draft = read_raw(&snapshot).read_string("app/text.txt").unwrap();
    std::fs::remove_file(&snapshot).unwrap();
    assert_eq!(draft.as_deref(), Some("draft"));
    assert!(!doc.auto_save_enabled());
}

#[tokio::test]
async fn test_canonical_save_discards_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();

    doc.set_content_modified(true);
    assert!(doc.auto_save_now().await.unwrap());
    assert!(doc.auto_save_path().exists());

    doc.save_current().await.unwrap();
    assert!(!doc.auto_save_path().exists());

    let kinds: Vec<_> = doc.changelog().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangelogType::Save, ChangelogType::Save]);
    assert!(
        stored_changelog(&path)
            .iter()
            .all(|e| e.kind != ChangelogType::AutoSave)
    );
}

#[tokio::test]
async fn test_close_discards_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.pkg");
    let doc = package(&[("text.txt", "v1")]);
    doc.save(&path).await.unwrap();
    doc.close().await;

    doc.open(&path, false, &CancellationToken::new())
        .await
        .unwrap();
    doc.set_content_modified(true);
    assert!(doc.auto_save_now().await.unwrap());
    let snapshot = doc.auto_save_path();

    doc.close().await;
    assert!(!snapshot.exists());
    assert!(path.exists());
}
