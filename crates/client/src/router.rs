//! Event router: fan out inbound events to registered handlers.
//!
//! The stream loop publishes without knowing who is subscribed; hosts register
//! handlers (a sensor, an automation hook, a printer) and unsubscribe with the
//! token returned at registration.

use crate::event::InboundEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registered consumer of inbound events. Returning an error marks this
/// delivery as failed for this handler only; it is logged and does not affect
/// other handlers or the stream loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: InboundEvent) -> Result<(), String>;
}

/// Handle returned by [`EventRouter::subscribe`]; pass it back to
/// [`EventRouter::unsubscribe`] to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

/// Registry of event handlers keyed by subscription token.
pub struct EventRouter {
    handlers: RwLock<HashMap<u64, Arc<dyn EventHandler>>>,
    next_id: AtomicU64,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler; it receives every event published after this call.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().await.insert(id, handler);
        SubscriptionToken(id)
    }

    /// Register a plain closure as a handler.
    pub async fn subscribe_fn<F>(&self, f: F) -> SubscriptionToken
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnHandler(f))).await
    }

    /// Remove a handler. Unknown or already-removed tokens are a no-op.
    pub async fn unsubscribe(&self, token: SubscriptionToken) {
        self.handlers.write().await.remove(&token.0);
    }

    /// Deliver an event to every handler registered at the start of this call.
    /// Handlers registered mid-publish are not called for this event; a handler
    /// removed mid-publish may still see it once. Handler errors are logged and
    /// never propagate to the publisher.
    pub async fn publish(&self, event: InboundEvent) {
        let snapshot: Vec<(u64, Arc<dyn EventHandler>)> = {
            let guard = self.handlers.read().await;
            guard.iter().map(|(id, h)| (*id, Arc::clone(h))).collect()
        };
        for (id, handler) in snapshot {
            if let Err(e) = handler.on_event(event.clone()).await {
                log::warn!("event handler {} failed: {}", id, e);
            }
        }
    }

    /// Number of currently registered handlers.
    pub async fn subscriber_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(InboundEvent) + Send + Sync,
{
    async fn on_event(&self, event: InboundEvent) -> Result<(), String> {
        (self.0)(event);
        Ok(())
    }
}
