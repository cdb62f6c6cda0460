//! Caller-facing resource subscriptions.

use std::sync::Arc;

use crate::adapters::realtime::{ConnectionHandle, Disposer};
use crate::domain::cache::{Entity, ResourceKind};

use super::cache_sync::CacheSyncService;

type SnapshotCallback = dyn Fn(&[Entity]) + Send + Sync;
type EntityCallback = dyn Fn(&Entity) + Send + Sync;

/// Optional callbacks invoked after a push event has been merged.
///
/// Callbacks receive merged cache values, never the raw payload. They run on
/// the transport's delivery context while the topic's registry is locked, so
/// they must not subscribe or close subscriptions themselves.
#[derive(Clone, Default)]
pub struct ResourceHandlers {
    pub(crate) on_snapshot: Option<Arc<SnapshotCallback>>,
    pub(crate) on_create: Option<Arc<EntityCallback>>,
    pub(crate) on_update: Option<Arc<EntityCallback>>,
}

impl ResourceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the whole collection after a pushed list is applied.
    pub fn on_snapshot(mut self, callback: impl Fn(&[Entity]) + Send + Sync + 'static) -> Self {
        self.on_snapshot = Some(Arc::new(callback));
        self
    }

    /// Called with the cached entity after a pushed create is merged.
    pub fn on_create(mut self, callback: impl Fn(&Entity) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(callback));
        self
    }

    /// Called with the cached entity after a pushed update is merged.
    pub fn on_update(mut self, callback: impl Fn(&Entity) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ResourceHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandlers")
            .field("on_snapshot", &self.on_snapshot.is_some())
            .field("on_create", &self.on_create.is_some())
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

/// One surface's live interest in a resource kind.
///
/// [`ResourceSubscription::close`] disposes every handler before returning,
/// so no callback fires afterwards. Dropping the subscription does the same
/// and releases the connection lease in the background.
#[must_use = "dropping a ResourceSubscription closes it"]
pub struct ResourceSubscription {
    kind: ResourceKind,
    service: Arc<CacheSyncService>,
    disposers: Vec<Disposer>,
    lease: Option<ConnectionHandle>,
}

impl ResourceSubscription {
    pub(crate) fn new(
        kind: ResourceKind,
        service: Arc<CacheSyncService>,
        disposers: Vec<Disposer>,
        lease: ConnectionHandle,
    ) -> Self {
        Self {
            kind,
            service,
            disposers,
            lease: Some(lease),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// True while every handler is still registered.
    pub fn is_active(&self) -> bool {
        self.lease.is_some() && self.disposers.iter().all(Disposer::is_active)
    }

    /// Disposes handlers, discards this kind's in-flight fetch if no other
    /// subscriber wants it, and releases the connection lease.
    pub async fn close(mut self) {
        let Some(lease) = self.detach() else {
            return;
        };
        self.service.connections().disconnect(&lease).await;
    }

    /// Synchronous part of closing. Returns the lease still to be released.
    fn detach(&mut self) -> Option<ConnectionHandle> {
        let lease = self.lease.take()?;
        for disposer in self.disposers.drain(..) {
            disposer.dispose();
        }
        self.service.release_interest(self.kind);
        tracing::debug!(kind = %self.kind, "Resource subscription closed");
        Some(lease)
    }
}

impl Drop for ResourceSubscription {
    fn drop(&mut self) {
        let Some(lease) = self.detach() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connections = Arc::clone(self.service.connections());
                runtime.spawn(async move {
                    connections.disconnect(&lease).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    kind = %self.kind,
                    "Subscription dropped outside a runtime; connection lease not released"
                );
            }
        }
    }
}

impl std::fmt::Debug for ResourceSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSubscription")
            .field("kind", &self.kind)
            .field("handlers", &self.disposers.len())
            .field("open", &self.lease.is_some())
            .finish()
    }
}
