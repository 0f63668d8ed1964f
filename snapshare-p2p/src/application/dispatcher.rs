//! Ordered, single-task event delivery.
//!
//! Events are queued without blocking the caller and handed to every handler
//! from one dispatch task, so all observers see the same order. Closing the
//! dispatcher discards anything still queued.

use crate::domain::SessionEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Receives session events on the dispatch task.
///
/// Handlers run one after another and must not block; hand long work off to
/// another task. A handler must not register further handlers from inside
/// `handle`.
pub trait EventHandler: Send + 'static {
    fn handle(&mut self, event: &SessionEvent);

    /// Handlers reporting `true` are dropped before the next event
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> EventHandler for F
where
    F: FnMut(&SessionEvent) + Send + 'static,
{
    fn handle(&mut self, event: &SessionEvent) {
        self(event)
    }
}

enum Dispatch {
    Event(SessionEvent),
    Close,
}

struct DispatcherInner {
    queue: mpsc::UnboundedSender<Dispatch>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
    handlers: Mutex<Vec<Box<dyn EventHandler>>>,
    closed: AtomicBool,
}

impl DispatcherInner {
    fn handlers(&self) -> MutexGuard<'_, Vec<Box<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(DispatcherInner {
                queue,
                pending: Mutex::new(Some(pending)),
                handlers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the dispatch task. Events raised earlier stay queued until then.
    /// Must be called from within a Tokio runtime; later calls do nothing.
    pub fn start(&self) {
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(queue) = pending {
            let inner = self.inner.clone();
            let span = tracing::debug_span!("event_dispatch");
            tokio::spawn(run(inner, queue).instrument(span));
        }
    }

    /// Queue an event for delivery. Returns `false` once closed.
    pub fn raise(&self, event: SessionEvent) -> bool {
        if self.is_closed() {
            tracing::trace!("Discarding event after close: {:?}", event);
            return false;
        }
        self.inner.queue.send(Dispatch::Event(event)).is_ok()
    }

    pub fn add_handler(&self, handler: impl EventHandler) {
        self.inner.handlers().push(Box::new(handler));
    }

    /// Subscribe to every event raised from now on
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.is_closed() {
            // the subscription ends immediately
            drop(tx);
        } else {
            self.add_handler(Forward(tx));
        }
        EventSubscription { events: rx }
    }

    /// Stop delivering. Queued events are dropped and subscriptions end.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.queue.send(Dispatch::Close);

        // never started: nobody else will release the handlers
        let never_started = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if never_started {
            self.inner.handlers().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers().len()
    }
}

async fn run(inner: Arc<DispatcherInner>, mut queue: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(Dispatch::Event(event)) = queue.recv().await {
        if inner.closed.load(Ordering::Acquire) {
            break;
        }

        let mut handlers = inner.handlers();
        handlers.retain(|handler| !handler.is_closed());
        for handler in handlers.iter_mut() {
            handler.handle(&event);
        }
    }

    tracing::debug!("Event dispatch stopped");
    inner.handlers().clear();
}

struct Forward(mpsc::UnboundedSender<SessionEvent>);

impl EventHandler for Forward {
    fn handle(&mut self, event: &SessionEvent) {
        let _ = self.0.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Stream of session events in dispatch order; ends when the session closes
#[derive(Debug)]
pub struct EventSubscription {
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventSubscription {
    /// Wait for the next event; `None` once the dispatcher is closed
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next event if one is already waiting
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }
}

impl Stream for EventSubscription {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
