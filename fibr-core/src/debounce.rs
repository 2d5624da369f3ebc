//! Time-windowed batching keyed by group.
//!
//! A single coordination task owns every pending group. Each `send` pushes
//! the group's deadline one window further; a ticker running at the window
//! period flushes groups whose deadline passed. Flush actions run as their
//! own tasks so a slow one never holds up `send`. Cancellation flushes
//! whatever is pending and waits for every running flush before the task
//! exits.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};

const CHANNEL_CAPACITY: usize = 256;

struct PendingGroup<T> {
    deadline: Instant,
    items: Vec<T>,
}

/// Sending half of a running debouncer. Cheap to clone.
pub struct GroupDebouncer<T> {
    sender: mpsc::Sender<(String, T)>,
    window: Duration,
}

impl<T> Clone for GroupDebouncer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            window: self.window,
        }
    }
}

impl<T> fmt::Debug for GroupDebouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupDebouncer")
            .field("window", &self.window)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> GroupDebouncer<T> {
    /// Spawns the coordination task. The returned handle completes once every
    /// flush, including the final one after cancellation, is done.
    pub fn start<F, Fut>(
        cancel: CancellationToken,
        window: Duration,
        action: F,
    ) -> (Self, JoinHandle<()>)
    where
        F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = window.max(Duration::from_millis(1));
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(coordinate(cancel, window, receiver, action));
        (Self { sender, window }, handle)
    }

    /// Adds `item` to `group`, postponing the group's flush by one window.
    pub async fn send(&self, group: impl Into<String>, item: T) -> Result<()> {
        self.sender
            .send((group.into(), item))
            .await
            .map_err(|_| PipelineError::Closed)
    }
}

async fn coordinate<T, F, Fut>(
    cancel: CancellationToken,
    window: Duration,
    mut receiver: mpsc::Receiver<(String, T)>,
    action: F,
) where
    T: Send + 'static,
    F: Fn(String, Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut groups: BTreeMap<String, PendingGroup<T>> = BTreeMap::new();
    let mut flushes = JoinSet::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = receiver.recv() => match message {
                Some((group, item)) => push(&mut groups, group, item, window),
                None => break,
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                let expired: Vec<String> = groups
                    .iter()
                    .filter(|(_, pending)| pending.deadline <= now)
                    .map(|(group, _)| group.clone())
                    .collect();
                for group in expired {
                    if let Some(pending) = groups.remove(&group) {
                        flushes.spawn(action(group, pending.items));
                    }
                }
            }
            Some(done) = flushes.join_next(), if !flushes.is_empty() => log_flush(done),
        }
    }

    receiver.close();
    while let Ok((group, item)) = receiver.try_recv() {
        push(&mut groups, group, item, window);
    }

    debug!(groups = groups.len(), "flushing pending groups");
    for (group, pending) in std::mem::take(&mut groups) {
        flushes.spawn(action(group, pending.items));
    }
    while let Some(done) = flushes.join_next().await {
        log_flush(done);
    }
}

fn log_flush(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = done {
        error!(error = %err, "debounced flush failed");
    }
}

fn push<T>(
    groups: &mut BTreeMap<String, PendingGroup<T>>,
    group: String,
    item: T,
    window: Duration,
) {
    let deadline = Instant::now() + window;
    let pending = groups.entry(group).or_insert_with(|| PendingGroup {
        deadline,
        items: Vec::new(),
    });
    pending.deadline = deadline;
    pending.items.push(item);
}
