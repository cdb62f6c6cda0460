//! Per-topic handler registration.
//!
//! Each `subscribe` call gets its own [`SubscriptionId`], and its [`Disposer`]
//! removes exactly that registration. Independent subscribers to the same
//! topic never interfere with each other.
//!
//! ```text
//! Topic: appointment.updated     Topic: patient.created
//! ├── sub-1 (calendar view)      └── sub-4 (patient list)
//! └── sub-3 (dashboard)
//! ```
//!
//! # Thread Safety
//!
//! Dispatch holds the registry's read lock while handlers run, and disposal
//! takes the write lock. Once `dispose()` returns, the handler cannot be
//! running and will never run again. As a consequence a handler must not
//! subscribe or dispose from inside its own callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::Value as JsonValue;

use crate::domain::cache::Topic;
use crate::domain::foundation::SubscriptionId;

/// Receives push messages for one topic.
pub trait PushHandler: Send + Sync {
    fn handle(&self, topic: &Topic, payload: &JsonValue);
}

impl<F> PushHandler for F
where
    F: Fn(&Topic, &JsonValue) + Send + Sync,
{
    fn handle(&self, topic: &Topic, payload: &JsonValue) {
        self(topic, payload)
    }
}

struct Registration {
    id: SubscriptionId,
    handler: Arc<dyn PushHandler>,
}

/// Registry of push handlers keyed by topic.
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<Topic, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `topic`.
    ///
    /// The returned [`Disposer`] removes this registration when disposed or
    /// dropped.
    pub fn subscribe(self: &Arc<Self>, topic: Topic, handler: Arc<dyn PushHandler>) -> Disposer {
        let id = SubscriptionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write()
            .entry(topic.clone())
            .or_default()
            .push(Registration { id, handler });
        tracing::trace!(%topic, subscription = %id, "Handler registered");

        Disposer {
            target: Some(DisposeTarget {
                registry: Arc::downgrade(self),
                topic,
                id,
            }),
        }
    }

    /// Invoke every handler registered for `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, topic: &str, payload: &JsonValue) -> usize {
        let topics = self.read();
        let Some((topic, registrations)) = topics.get_key_value(topic) else {
            tracing::trace!(topic, "No handlers for push message");
            return 0;
        };
        for registration in registrations {
            registration.handler.handle(topic, payload);
        }
        registrations.len()
    }

    /// Drop every registration, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut topics = self.write();
        let count = topics.values().map(Vec::len).sum();
        topics.clear();
        count
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn total_handler_count(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    fn remove(&self, topic: &Topic, id: SubscriptionId) -> bool {
        let mut topics = self.write();
        let Some(registrations) = topics.get_mut(topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() < before;
        if registrations.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Topic, Vec<Registration>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Topic, Vec<Registration>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct DisposeTarget {
    registry: Weak<SubscriptionRegistry>,
    topic: Topic,
    id: SubscriptionId,
}

/// Removes one handler registration.
///
/// Dropping the disposer disposes it. A disposer created while no
/// connection existed is inert.
#[must_use = "dropping a Disposer unsubscribes its handler immediately"]
pub struct Disposer {
    target: Option<DisposeTarget>,
}

impl Disposer {
    /// A disposer bound to nothing.
    pub fn noop() -> Self {
        Self { target: None }
    }

    /// True while the registration it guards still exists.
    pub fn is_active(&self) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        target.registry.upgrade().is_some_and(|registry| {
            registry
                .read()
                .get(&target.topic)
                .is_some_and(|regs| regs.iter().any(|r| r.id == target.id))
        })
    }

    /// Remove the handler now.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };
        if let Some(registry) = target.registry.upgrade() {
            if registry.remove(&target.topic, target.id) {
                tracing::trace!(topic = %target.topic, subscription = %target.id, "Handler disposed");
            }
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "Disposer({}, {})", target.topic, target.id),
            None => write!(f, "Disposer(noop)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn PushHandler> {
        Arc::new(move |_: &Topic, _: &JsonValue| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_all_handlers_on_topic() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let _a = registry.subscribe("patient.created".into(), counting_handler(counter.clone()));
        let _b = registry.subscribe("patient.created".into(), counting_handler(counter.clone()));

        let invoked = registry.dispatch("patient.created", &json!({"id": 1}));

        assert_eq!(invoked, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispatch_ignores_other_topics() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let _a = registry.subscribe("patient.created".into(), counting_handler(counter.clone()));

        assert_eq!(registry.dispatch("patient.updated", &json!({})), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_removes_only_its_own_handler() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let topic = Topic::from("appointment.updated");

        let disposer = registry.subscribe(topic.clone(), counting_handler(first.clone()));
        let _kept = registry.subscribe(topic.clone(), counting_handler(second.clone()));

        disposer.dispose();
        registry.dispatch(topic.as_str(), &json!({"id": 1}));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count(&topic), 1);
    }

    #[test]
    fn dropping_disposer_unsubscribes() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _scoped = registry.subscribe("dashboard.list".into(), counting_handler(counter.clone()));
        }

        registry.dispatch("dashboard.list", &json!([]));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(registry.total_handler_count(), 0);
    }

    #[test]
    fn disposer_outliving_registry_is_harmless() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let disposer = registry.subscribe("patient.list".into(), Arc::new(|_: &Topic, _: &JsonValue| {}));
        drop(registry);

        assert!(!disposer.is_active());
        disposer.dispose();
    }

    #[test]
    fn clear_drops_all_registrations() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let a = registry.subscribe("patient.list".into(), Arc::new(|_: &Topic, _: &JsonValue| {}));
        let b = registry.subscribe("patient.created".into(), Arc::new(|_: &Topic, _: &JsonValue| {}));

        assert_eq!(registry.clear(), 2);
        assert!(!a.is_active());
        assert!(!b.is_active());
    }

    #[test]
    fn noop_disposer_is_inactive() {
        let disposer = Disposer::noop();
        assert!(!disposer.is_active());
        assert_eq!(format!("{:?}", disposer), "Disposer(noop)");
    }
}
