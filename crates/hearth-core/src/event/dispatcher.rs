use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex; // Use tokio's Mutex

use crate::event::error::EventSystemError;
use crate::event::{AsyncEventHandler, Event, SubscriptionId};
use crate::utils::panic_message;

//--------------------------------------------------
// EventDispatcher (Internal, wrapped by SharedEventDispatcher)
//--------------------------------------------------

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    owner: String,
    handler: Arc<dyn AsyncEventHandler>,
}

/// Subscriber table keyed by event name
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<Subscription>>,
    next_subscription_id: SubscriptionId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler_count: usize = self.handlers.values().map(|v| v.len()).sum();
        f.debug_struct("EventDispatcher")
            .field("handlers_count", &handler_count)
            .field("next_subscription_id", &self.next_subscription_id)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_subscription_id: 1,
        }
    }

    pub fn subscribe(
        &mut self,
        event_name: &str,
        owner: &str,
        handler: Arc<dyn AsyncEventHandler>,
    ) -> SubscriptionId {
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        self.handlers
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription {
                id,
                owner: owner.to_string(),
                handler,
            });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut found = false;
        self.handlers.values_mut().for_each(|subs| {
            let len_before = subs.len();
            subs.retain(|s| s.id != id);
            if subs.len() < len_before {
                found = true;
            }
        });
        self.handlers.retain(|_, subs| !subs.is_empty());
        found
    }

    /// Removes every subscription made on behalf of `owner`
    pub fn unsubscribe_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        self.handlers.values_mut().for_each(|subs| {
            let len_before = subs.len();
            subs.retain(|s| s.owner != owner);
            removed += len_before - subs.len();
        });
        self.handlers.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.handlers.get(event_name).map_or(0, |subs| subs.len())
    }

    fn snapshot(&self, event_name: &str) -> Vec<Subscription> {
        self.handlers.get(event_name).cloned().unwrap_or_default()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one publish call
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Subscribers that handled the event without error
    pub delivered: usize,
    /// Subscribers that returned an error or panicked, with their owner
    pub failures: Vec<(String, EventSystemError)>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

//--------------------------------------------------
// SharedEventDispatcher (Public API)
//--------------------------------------------------

/// Thread-safe shared event dispatcher using Tokio Mutex
#[derive(Clone)]
pub struct SharedEventDispatcher {
    dispatcher: Arc<Mutex<EventDispatcher>>,
}

impl fmt::Debug for SharedEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventDispatcher").finish_non_exhaustive()
    }
}

impl SharedEventDispatcher {
    pub fn new() -> Self {
        Self {
            dispatcher: Arc::new(Mutex::new(EventDispatcher::new())),
        }
    }

    pub async fn subscribe(
        &self,
        event_name: &str,
        owner: &str,
        handler: Arc<dyn AsyncEventHandler>,
    ) -> SubscriptionId {
        let mut dispatcher = self.dispatcher.lock().await;
        dispatcher.subscribe(event_name, owner, handler)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut dispatcher = self.dispatcher.lock().await;
        dispatcher.unsubscribe(id)
    }

    pub async fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut dispatcher = self.dispatcher.lock().await;
        dispatcher.unsubscribe_owner(owner)
    }

    pub async fn subscriber_count(&self, event_name: &str) -> usize {
        self.dispatcher.lock().await.subscriber_count(event_name)
    }

    /// Delivers `event` to a snapshot of its subscribers.
    ///
    /// The lock is held only while copying the subscriber list. Errors and
    /// panics are caught per subscriber and collected in the report.
    pub async fn publish(&self, event: &dyn Event) -> PublishReport {
        let subscribers = {
            let dispatcher = self.dispatcher.lock().await;
            dispatcher.snapshot(event.name())
        };

        let mut report = PublishReport::default();
        for sub in subscribers {
            let outcome = AssertUnwindSafe(sub.handler.handle(event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    log::warn!(
                        "Subscriber {} of '{}' (owner '{}') failed: {}",
                        sub.id,
                        event.name(),
                        sub.owner,
                        e
                    );
                    report.failures.push((sub.owner, e));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!(
                        "Subscriber {} of '{}' (owner '{}') panicked: {}",
                        sub.id,
                        event.name(),
                        sub.owner,
                        message
                    );
                    report.failures.push((
                        sub.owner,
                        EventSystemError::HandlerPanicked {
                            subscription: sub.id,
                            event_name: event.name().to_string(),
                            message,
                        },
                    ));
                }
            }
        }
        report
    }
}

impl Default for SharedEventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------
// Helper Functions
//--------------------------------------------------

/// Create a new event dispatcher instance
pub fn create_dispatcher() -> SharedEventDispatcher {
    SharedEventDispatcher::new()
}

struct SyncHandler<F> {
    f: F,
}

#[async_trait]
impl<F> AsyncEventHandler for SyncHandler<F>
where
    F: Fn(&dyn Event) -> Result<(), EventSystemError> + Send + Sync,
{
    async fn handle(&self, event: &dyn Event) -> Result<(), EventSystemError> {
        (self.f)(event)
    }
}

struct TypedHandler<E, F> {
    f: F,
    _event: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, F> AsyncEventHandler for TypedHandler<E, F>
where
    E: Event + 'static,
    F: Fn(&E) -> Result<(), EventSystemError> + Send + Sync,
{
    async fn handle(&self, event: &dyn Event) -> Result<(), EventSystemError> {
        match event.as_any().downcast_ref::<E>() {
            Some(e) => (self.f)(e),
            None => Err(EventSystemError::UnexpectedEventType {
                event_name: event.name().to_string(),
            }),
        }
    }
}

/// Helper function to create synchronous handlers that are compatible with async system
pub fn sync_event_handler<F>(f: F) -> Arc<dyn AsyncEventHandler>
where
    F: Fn(&dyn Event) -> Result<(), EventSystemError> + Send + Sync + 'static,
{
    Arc::new(SyncHandler { f })
}

/// Helper function to create typed synchronous handlers
pub fn typed_event_handler<E, F>(f: F) -> Arc<dyn AsyncEventHandler>
where
    E: Event + 'static,
    F: Fn(&E) -> Result<(), EventSystemError> + Send + Sync + 'static,
{
    Arc::new(TypedHandler {
        f,
        _event: PhantomData,
    })
}
