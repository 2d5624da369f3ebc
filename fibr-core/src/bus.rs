//! Fan-out dispatch of storage events to the pipeline consumers.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fibr_model::Event;
use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::BusConfig;
use crate::error::{PipelineError, Result};

/// One concern reacting to storage events.
#[async_trait]
pub trait Consumer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Handles one event. Errors are logged by the bus and never reach the
    /// publisher.
    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<()>;
}

/// Entry point for anything producing events.
#[async_trait]
pub trait EventPublisher: Send + Sync + fmt::Debug {
    /// Fails only once the bus stopped accepting events.
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Bounded queue feeding a pool of dispatch tasks.
///
/// Each event visits every consumer in registration order; distinct events
/// run concurrently up to `max_concurrency`. Per-item ordering is not
/// guaranteed here, consumers rely on the exclusive executor for that.
pub struct EventBus {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    config: BusConfig,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = self
            .receiver
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true);
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("started", &started)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_concurrency.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            config,
        }
    }

    /// Starts dispatching to `consumers`.
    ///
    /// After `cancel` fires the bus stops accepting events, dispatches what
    /// was already buffered, waits for in-flight events, then the returned
    /// handle completes.
    pub fn start(
        &self,
        cancel: CancellationToken,
        consumers: Vec<Arc<dyn Consumer>>,
    ) -> Result<JoinHandle<()>> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| PipelineError::Internal("event bus state poisoned".into()))?
            .take()
            .ok_or_else(|| PipelineError::Internal("event bus already started".into()))?;

        info!(
            consumers = ?consumers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            max_concurrency = self.config.max_concurrency,
            "starting event bus"
        );

        Ok(tokio::spawn(run(
            receiver,
            Arc::from(consumers),
            cancel,
            self.config,
        )))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| PipelineError::Closed)
    }
}

async fn run(
    mut receiver: mpsc::Receiver<Event>,
    consumers: Arc<[Arc<dyn Consumer>]>,
    cancel: CancellationToken,
    config: BusConfig,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let dispatch_cancel = CancellationToken::new();
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            event = receiver.recv() => match event {
                Some(event) => {
                    spawn_dispatch(&mut tasks, &semaphore, &consumers, &dispatch_cancel, event).await
                }
                None => break,
            },
        }
    }

    receiver.close();
    debug!("event bus draining");

    let drained = tokio::time::timeout(config.drain_timeout(), async {
        while let Some(event) = receiver.recv().await {
            spawn_dispatch(&mut tasks, &semaphore, &consumers, &dispatch_cancel, event).await;
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = tasks.len(),
            "event bus drain timed out, cancelling in-flight consumers"
        );
        dispatch_cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }

    info!("event bus stopped");
}

async fn spawn_dispatch(
    tasks: &mut JoinSet<()>,
    semaphore: &Arc<Semaphore>,
    consumers: &Arc<[Arc<dyn Consumer>]>,
    cancel: &CancellationToken,
    event: Event,
) {
    let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
        error!("event bus semaphore closed, dropping event");
        return;
    };
    let consumers = Arc::clone(consumers);
    let cancel = cancel.clone();

    tasks.spawn(async move {
        let _permit = permit;
        dispatch(&consumers, &cancel, &event).await;
    });
}

/// Runs every consumer for one event, isolating errors and panics.
pub(crate) async fn dispatch(
    consumers: &[Arc<dyn Consumer>],
    cancel: &CancellationToken,
    event: &Event,
) {
    let span = info_span!(
        "event",
        kind = %event.kind,
        item = %event.item.pathname,
        correlation_id = %event.trace_context.correlation_id,
    );

    async {
        for consumer in consumers {
            let outcome = AssertUnwindSafe(consumer.handle(cancel, event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(consumer = consumer.name(), error = %err, "consumer failed")
                }
                Err(panic) => error!(
                    consumer = consumer.name(),
                    panic = %panic_message(panic.as_ref()),
                    "consumer panicked"
                ),
            }
        }
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "event dispatch task failed");
    }
}
