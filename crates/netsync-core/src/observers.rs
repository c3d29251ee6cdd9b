//! Ordered observer lists with explicit deregistration.
//!
//! An [`ObserverList`] is the building block of both the update dispatcher
//! and the consensus scheduler. Handlers run in registration order.
//! [`ObserverList::notify`] iterates a snapshot of the list taken at the
//! moment of emission, so handlers added or removed while a notification
//! is in flight only affect later notifications.
//!
//! A handler that returns an error or panics is isolated: the failure is
//! logged, counted in the returned [`NotifyReport`], and the remaining
//! handlers still run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

/// Error type returned by observer handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by observer handlers.
pub type HandlerResult = Result<(), HandlerError>;

type Handler<T> = Arc<dyn Fn(&T) -> HandlerResult + Send + Sync>;

/// Identifier of one registered handler, unique within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one notification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

struct Entries<T> {
    next_id: u64,
    handlers: Vec<(ObserverId, Handler<T>)>,
}

/// Type-erased removal so a [`Subscription`] does not carry the payload type.
trait Detach: Send + Sync {
    fn detach(&self, id: ObserverId) -> bool;
    fn contains(&self, id: ObserverId) -> bool;
}

impl<T: 'static> Detach for Mutex<Entries<T>> {
    fn detach(&self, id: ObserverId) -> bool {
        let mut entries = self.lock();
        let before = entries.handlers.len();
        entries.handlers.retain(|(existing, _)| *existing != id);
        entries.handlers.len() != before
    }

    fn contains(&self, id: ObserverId) -> bool {
        self.lock().handlers.iter().any(|(existing, _)| *existing == id)
    }
}

/// Capability to deregister one handler.
///
/// Dropping a subscription does not remove the handler; call
/// [`unsubscribe`](Self::unsubscribe) (or the owning component's `off`).
/// A subscription outliving its list is inert.
pub struct Subscription {
    id: ObserverId,
    topic: &'static str,
    list: Weak<dyn Detach>,
}

impl Subscription {
    /// Identifier of the registered handler.
    pub const fn id(&self) -> ObserverId {
        self.id
    }

    /// Name of the list the handler is registered on.
    pub const fn topic(&self) -> &'static str {
        self.topic
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.contains(self.id))
    }

    /// Remove the handler. Returns `false` if it was already removed.
    pub fn unsubscribe(self) -> bool {
        self.detach()
    }

    pub(crate) fn detach(&self) -> bool {
        self.list.upgrade().is_some_and(|list| list.detach(self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// An ordered list of handlers for payloads of type `T`.
pub struct ObserverList<T> {
    topic: &'static str,
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: 'static> ObserverList<T> {
    /// Create an empty list. `topic` names the list in diagnostics.
    pub fn new(topic: &'static str) -> Self {
        Self {
            topic,
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Append a handler and return its deregistration capability.
    pub fn add<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let id = {
            let mut entries = self.entries.lock();
            let id = ObserverId(entries.next_id);
            entries.next_id = entries.next_id.wrapping_add(1);
            entries.handlers.push((id, Arc::new(handler)));
            id
        };
        let erased: Arc<dyn Detach> = Arc::clone(&self.entries) as Arc<dyn Detach>;
        Subscription {
            id,
            topic: self.topic,
            list: Arc::downgrade(&erased),
        }
    }

    /// Remove a handler by id. Returns `false` if it was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        self.entries.detach(id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.lock().handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().handlers.is_empty()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.entries.lock().handlers.clear();
    }

    /// Invoke every handler registered at this moment, in order.
    pub fn notify(&self, payload: &T) -> NotifyReport {
        let snapshot: Vec<(ObserverId, Handler<T>)> = self
            .entries
            .lock()
            .handlers
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        let mut report = NotifyReport::default();
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => report.delivered = report.delivered.saturating_add(1),
                Ok(Err(e)) => {
                    warn!(topic = self.topic, observer = %id, error = %e, "observer failed");
                    report.failed = report.failed.saturating_add(1);
                }
                Err(_) => {
                    warn!(topic = self.topic, observer = %id, "observer panicked");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        report
    }
}

impl<T> fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("topic", &self.topic)
            .field("handlers", &self.entries.lock().handlers.len())
            .finish()
    }
}
