//! In-process publish/subscribe bus with optional request/reply.
//!
//! This crate owns the message model shared by every console component. Any
//! component can publish to any other without holding a reference to it;
//! receivers opt in with a [`Selector`]. Delivery is synchronous: `publish`
//! returns after every matching handler has run.
//!
//! DESIGN
//! ======
//! The subscriber table sits behind a mutex, but handlers are invoked with
//! the lock released so a handler may publish, subscribe or unsubscribe
//! without deadlocking. A handler that panics is logged and skipped.

pub mod envelope;
pub mod selector;

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;

pub use envelope::{Endpoint, Envelope, Message, Meta, REPLY_SUFFIX, next_id, now_ms};
pub use selector::Selector;

/// Default time `request` waits for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(8000);

/// Error returned by [`EventBus::request`].
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No matching reply arrived in time.
    #[error("bus request timeout after {timeout_ms}ms (correlation {correlation_id})")]
    Timeout { correlation_id: String, timeout_ms: u128 },
    /// The bus was dropped while the request was pending.
    #[error("bus closed before a reply arrived")]
    Closed,
}

type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct Subscriber {
    selector: Selector,
    handler: Handler,
}

struct BusInner {
    subs: Mutex<BTreeMap<u64, Subscriber>>,
    next_sub: AtomicU64,
    request_timeout: Duration,
}

impl Default for BusInner {
    fn default() -> Self {
        Self {
            subs: Mutex::default(),
            next_sub: AtomicU64::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        self.subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn contains(&self, id: u64) -> bool {
        self.subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

/// Shared publish/subscribe hub. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose [`EventBus::request`] waits `timeout` for replies.
    #[must_use]
    pub fn with_request_timeout(timeout: Duration) -> Self {
        Self { inner: Arc::new(BusInner { request_timeout: timeout, ..BusInner::default() }) }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Register `handler` for every published message matching `selector`.
    ///
    /// Handlers run in registration order. The returned handle removes the
    /// subscription; dropping it does not.
    pub fn subscribe<F>(&self, selector: Selector, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        self.insert(id, selector, Arc::new(handler));
        Subscription { id, bus: Arc::downgrade(&self.inner) }
    }

    fn insert(&self, id: u64, selector: Selector, handler: Handler) {
        self.inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscriber { selector, handler });
    }

    /// Publish a message to every matching subscriber. Returns the envelope id.
    pub fn publish(&self, message: Message) -> String {
        let envelope = Envelope::seal(message);
        let snapshot: Vec<(u64, Selector, Handler)> = self
            .inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, sub)| (*id, sub.selector.clone(), Arc::clone(&sub.handler)))
            .collect();

        for (id, selector, handler) in snapshot {
            // An earlier handler may have removed this subscriber.
            if !self.inner.contains(id) || !selector.matches(&envelope) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(&envelope))).is_err() {
                tracing::error!(
                    subscription = id,
                    kind = %envelope.kind,
                    id = %envelope.id,
                    "bus handler panicked"
                );
            }
        }
        envelope.id
    }

    /// Publish `message` and wait for its reply using the bus's request
    /// timeout ([`DEFAULT_REQUEST_TIMEOUT`] unless configured).
    ///
    /// # Errors
    ///
    /// See [`EventBus::request_with_timeout`].
    pub async fn request(&self, message: Message) -> Result<Envelope, BusError> {
        self.request_with_timeout(message, self.inner.request_timeout).await
    }

    /// Publish `message` tagged with a fresh correlation id and wait for the
    /// first reply carrying that id.
    ///
    /// A reply is any envelope whose type ends in `/reply` or whose
    /// `isReply` flag is set. The internal subscription is removed as soon as
    /// the first reply is seen or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] when no reply arrives within `timeout`.
    pub async fn request_with_timeout(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let correlation_id = next_id("corr");
        message.meta.correlation_id = Some(correlation_id.clone());

        let (tx, rx) = oneshot::channel::<Envelope>();
        let slot = Mutex::new(Some(tx));
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let expected = correlation_id.clone();
        let handler = move |evt: &Envelope| {
            if evt.correlation_id() != Some(expected.as_str()) || !evt.is_reply() {
                return;
            }
            let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
            if tx.send(evt.clone()).is_err() {
                tracing::debug!(correlation_id = %expected, "reply arrived after the requester gave up");
            }
        };
        self.insert(id, Selector::all(), Arc::new(handler));
        let subscription = Subscription { id, bus: Arc::downgrade(&self.inner) };

        self.publish(message);

        let outcome = tokio::time::timeout(timeout, rx).await;
        subscription.unsubscribe();
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                tracing::debug!(%correlation_id, "bus request timed out");
                Err(BusError::Timeout { correlation_id, timeout_ms: timeout.as_millis() })
            }
        }
    }

    /// Number of live subscriptions, including pending requests.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the subscription. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }

    /// True while the subscription is registered on a live bus.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.bus.upgrade().is_some_and(|inner| inner.contains(self.id))
    }

    /// Convert into a guard that unsubscribes when dropped.
    #[must_use]
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

/// Unsubscribes on drop. Ties a subscription to the lifetime of its owner.
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl SubscriptionGuard {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.is_active()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
