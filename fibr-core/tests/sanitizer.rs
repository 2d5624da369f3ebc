#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fibr_core::config::{ExclusiveConfig, SanitizerConfig};
use fibr_core::exclusive::{Exclusive, LocalLock, LockBackend};
use fibr_core::model::{Event, EventType, Item};
use fibr_core::sanitizer::{Sanitizer, ScanReport};
use fibr_core::storage::{LocalStorage, Storage};
use fibr_core::version::mutex_key;
use fibr_core::{EventPublisher, PipelineError, Result};
use tokio_util::sync::CancellationToken;

use support::{RecordingPublisher, put, temp_storage};

fn sanitizer(
    storage: Arc<dyn Storage>,
    publisher: &Arc<RecordingPublisher>,
    config: SanitizerConfig,
) -> Sanitizer {
    Sanitizer::new(
        storage,
        Exclusive::disabled(),
        Arc::clone(publisher) as Arc<dyn EventPublisher>,
        config,
    )
}

fn renaming() -> SanitizerConfig {
    SanitizerConfig {
        rename: true,
        ..SanitizerConfig::default()
    }
}

fn summary(events: &[Event]) -> Vec<(EventType, String, Option<String>)> {
    events
        .iter()
        .map(|event| {
            (
                event.kind,
                event.item.pathname.clone(),
                event.new_item.as_ref().map(|item| item.pathname.clone()),
            )
        })
        .collect()
}

#[tokio::test]
async fn scan_renames_then_replays_every_entry() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/A Dir/Été.JPG", b"jpeg").await;
    put(&storage, "/b/c.txt", b"text").await;
    put(&storage, "/.fibr/x.json", b"{}").await;

    let publisher = Arc::new(RecordingPublisher::default());
    let report = sanitizer(storage.clone(), &publisher, renaming())
        .run(&CancellationToken::new())
        .await
        .expect("scan")
        .expect("enabled");

    assert_eq!(
        report,
        ScanReport {
            files: 2,
            directories: 2,
            renamed: 2,
            orphans: 0,
        }
    );
    assert_eq!(
        summary(&publisher.events()),
        vec![
            (EventType::Rename, "/A Dir".into(), Some("/a_dir".into())),
            (
                EventType::Rename,
                "/a_dir/Été.JPG".into(),
                Some("/a_dir/ete.jpg".into())
            ),
            (EventType::Start, "/a_dir/ete.jpg".into(), None),
            (EventType::Start, "/b/c.txt".into(), None),
            (EventType::Start, "/a_dir".into(), None),
            (EventType::Start, "/b".into(), None),
        ]
    );
    assert!(storage.stat("/a_dir/ete.jpg").await.expect("stat").is_some());
    assert!(storage.stat("/A Dir").await.expect("stat").is_none());
}

#[tokio::test]
async fn report_only_mode_keeps_names() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/Holidays/IMG 01.JPG", b"jpeg").await;

    let publisher = Arc::new(RecordingPublisher::default());
    sanitizer(storage.clone(), &publisher, SanitizerConfig::default())
        .run(&CancellationToken::new())
        .await
        .expect("scan");

    assert!(
        publisher
            .events()
            .iter()
            .all(|event| event.kind == EventType::Start)
    );
    assert!(
        storage
            .stat("/Holidays/IMG 01.JPG")
            .await
            .expect("stat")
            .is_some()
    );
}

#[tokio::test]
async fn taken_names_are_left_alone() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/Photo.jpg", b"upper").await;
    put(&storage, "/photo.jpg", b"lower").await;

    let publisher = Arc::new(RecordingPublisher::default());
    let report = sanitizer(storage.clone(), &publisher, renaming())
        .run(&CancellationToken::new())
        .await
        .expect("scan")
        .expect("enabled");

    assert_eq!(report.renamed, 0);
    assert_eq!(report.files, 2);
    assert_eq!(storage.read("/Photo.jpg").await.expect("read"), b"upper");
}

#[tokio::test]
async fn disabled_scan_does_nothing() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/a.jpg", b"jpeg").await;

    let publisher = Arc::new(RecordingPublisher::default());
    let config = SanitizerConfig {
        enabled: false,
        ..SanitizerConfig::default()
    };
    let report = sanitizer(storage, &publisher, config)
        .run(&CancellationToken::new())
        .await
        .expect("scan");

    assert!(report.is_none());
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn cancelled_scan_stops() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/a.jpg", b"jpeg").await;

    let publisher = Arc::new(RecordingPublisher::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = sanitizer(storage, &publisher, SanitizerConfig::default())
        .run(&cancel)
        .await;
    assert!(matches!(result, Err(PipelineError::Cancelled(_))));
    assert!(publisher.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scan_waits_for_the_boot_lock() {
    let (_dir, storage) = temp_storage();
    put(&storage, "/a.jpg", b"jpeg").await;

    let lock = Arc::new(LocalLock::new());
    assert!(
        lock.try_acquire(&mutex_key("start"), "other-instance", Duration::from_secs(60))
            .await
            .expect("acquire")
    );

    let exclusive = Exclusive::new(
        Some(lock.clone() as Arc<dyn LockBackend>),
        &ExclusiveConfig {
            ttl_ms: 1_000,
            retry_interval_ms: 100,
        },
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let scan = Sanitizer::new(
        storage,
        exclusive,
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        SanitizerConfig::default(),
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stopper.cancel();
    });

    let result = scan.run(&cancel).await;
    assert!(matches!(result, Err(PipelineError::Cancelled(_))));
    assert!(publisher.events().is_empty());
}

/// Local storage whose root listing also reports a file under a directory
/// that does not exist.
#[derive(Debug)]
struct GhostStorage {
    inner: Arc<LocalStorage>,
}

#[async_trait]
impl Storage for GhostStorage {
    async fn info(&self, pathname: &str) -> Result<Item> {
        self.inner.info(pathname).await
    }

    async fn list(&self, pathname: &str) -> Result<Vec<Item>> {
        let mut items = self.inner.list(pathname).await?;
        if pathname == "/" {
            items.push(Item::file("/ghost/file.jpg", 4, Utc::now()));
        }
        Ok(items)
    }

    async fn mkdir(&self, pathname: &str) -> Result<()> {
        self.inner.mkdir(pathname).await
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.inner.rename(old, new).await
    }

    async fn remove_all(&self, pathname: &str) -> Result<()> {
        self.inner.remove_all(pathname).await
    }

    async fn read(&self, pathname: &str) -> Result<Vec<u8>> {
        self.inner.read(pathname).await
    }

    async fn write(&self, pathname: &str, content: &[u8]) -> Result<()> {
        self.inner.write(pathname, content).await
    }

    async fn update_date(&self, pathname: &str, date: DateTime<Utc>) -> Result<()> {
        self.inner.update_date(pathname, date).await
    }
}

#[tokio::test]
async fn orphans_get_their_parent_back() {
    let (_dir, storage) = temp_storage();
    let ghost = Arc::new(GhostStorage {
        inner: storage.clone(),
    });

    let publisher = Arc::new(RecordingPublisher::default());
    let config = SanitizerConfig {
        mkdir: true,
        ..SanitizerConfig::default()
    };
    let report = sanitizer(ghost, &publisher, config)
        .run(&CancellationToken::new())
        .await
        .expect("scan")
        .expect("enabled");

    assert_eq!(report.orphans, 1);
    assert_eq!(report.files, 1);
    let parent = storage.stat("/ghost").await.expect("stat").expect("parent created");
    assert!(parent.is_dir);
    assert_eq!(
        summary(&publisher.events()),
        vec![(EventType::Start, "/ghost/file.jpg".into(), None)]
    );
}
