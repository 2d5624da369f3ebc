#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fibr_core::metadata::ExifExtractor;
use fibr_core::mirror::Mirror;
use fibr_core::queue::JobQueue;
use fibr_core::model::{Event, Exif, Item};
use fibr_core::storage::{LocalStorage, Storage};
use fibr_core::thumbnail::Renderer;
use fibr_core::{EventPublisher, Result};
use mockall::mock;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Local storage rooted in a fresh temporary directory. Keep the `TempDir`
/// alive for the duration of the test.
pub fn temp_storage() -> (TempDir, Arc<LocalStorage>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(LocalStorage::new(dir.path()));
    (dir, storage)
}

pub async fn put(storage: &LocalStorage, pathname: &str, content: &[u8]) -> Item {
    storage.write(pathname, content).await.expect("write fixture");
    storage.info(pathname).await.expect("stat fixture")
}

pub async fn mkdir(storage: &LocalStorage, pathname: &str) -> Item {
    storage.mkdir(pathname).await.expect("mkdir fixture");
    storage.info(pathname).await.expect("stat fixture")
}

/// Publisher keeping every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().expect("events lock").push(event);
        Ok(())
    }
}

/// In-memory job transport: published jobs are recorded, replies are pushed
/// by the test through [`MemoryQueue::reply`].
#[derive(Debug, Default)]
pub struct MemoryQueue {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    requeued: Mutex<Vec<(String, Vec<u8>)>>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl MemoryQueue {
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published
            .lock()
            .expect("queue lock")
            .iter()
            .map(|(key, payload)| {
                (key.clone(), serde_json::from_slice(payload).expect("json job"))
            })
            .collect()
    }

    /// Payloads handed back, head of the queue first.
    pub fn requeued(&self) -> Vec<(String, serde_json::Value)> {
        self.requeued
            .lock()
            .expect("queue lock")
            .iter()
            .map(|(key, payload)| {
                (key.clone(), serde_json::from_slice(payload).expect("json reply"))
            })
            .collect()
    }

    pub async fn reply(&self, routing_key: &str, payload: serde_json::Value) {
        let sender = self
            .subscribers
            .lock()
            .expect("queue lock")
            .get(routing_key)
            .cloned()
            .expect("no subscriber for routing key");
        sender
            .send(serde_json::to_vec(&payload).expect("encode reply"))
            .await
            .expect("deliver reply");
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.published
            .lock()
            .expect("queue lock")
            .push((routing_key.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, routing_key: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (sender, receiver) = mpsc::channel(16);
        self.subscribers
            .lock()
            .expect("queue lock")
            .insert(routing_key.to_string(), sender);
        Ok(receiver)
    }

    async fn requeue(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.requeued
            .lock()
            .expect("queue lock")
            .insert(0, (routing_key.to_string(), payload));
        Ok(())
    }
}

/// Mirror shared by several services of the same test, standing in for a
/// pub/sub server between instances.
#[derive(Debug, Default)]
pub struct LoopbackMirror {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

#[async_trait]
impl Mirror for LoopbackMirror {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let subscribers = self
            .subscribers
            .lock()
            .expect("mirror lock")
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for subscriber in subscribers {
            let _ = subscriber.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (sender, receiver) = mpsc::channel(64);
        self.subscribers
            .lock()
            .expect("mirror lock")
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}

/// Polls `check` until it holds or five seconds elapsed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

mock! {
    pub Renderer {}

    #[async_trait]
    impl Renderer for Renderer {
        async fn thumbnail(&self, item: &Item, scale: u64, content: Option<Vec<u8>>) -> Result<Vec<u8>>;
        async fn bitrate(&self, item: &Item) -> Result<Option<u64>>;
        async fn generate_stream(&self, item: &Item, output: &str) -> Result<()>;
        async fn rename_stream(&self, old: &str, new: &str) -> Result<()>;
        async fn delete_stream(&self, stream: &str) -> Result<()>;
        fn direct_access(&self) -> bool;
    }
}

mock! {
    pub Extractor {}

    #[async_trait]
    impl ExifExtractor for Extractor {
        async fn extract(&self, item: &Item, content: Option<Vec<u8>>) -> Result<Exif>;
        fn direct_access(&self) -> bool;
    }
}

impl std::fmt::Debug for MockRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRenderer").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MockExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExtractor").finish_non_exhaustive()
    }
}
