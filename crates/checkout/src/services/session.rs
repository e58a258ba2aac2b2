//! Shopper sessions: which cart a session is building and which orders it
//! has placed.

use std::time::Duration;

use async_trait::async_trait;
use moka::Entry;
use moka::future::Cache;

use mercato_core::{OrderId, SessionId};

/// Session-scoped cart bookkeeping.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn set_current_order(&self, session: SessionId, order_id: OrderId);

    async fn current_order(&self, session: SessionId) -> Option<OrderId>;

    /// Forget the session's current cart.
    async fn clear(&self, session: SessionId);

    /// Remember an order placed in this session, so the shopper can see it
    /// without logging in.
    async fn record_placed_order(&self, session: SessionId, order_id: OrderId);

    async fn placed_orders(&self, session: SessionId) -> Vec<OrderId>;
}

#[derive(Debug, Clone, Default)]
struct SessionData {
    current_order: Option<OrderId>,
    placed_orders: Vec<OrderId>,
}

/// Session store backed by a `moka` cache; sessions expire after a period
/// of inactivity.
#[derive(Clone)]
pub struct MemorySessionStore {
    cache: Cache<SessionId, SessionData>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(idle)
            .build();
        Self { cache }
    }

    async fn data(&self, session: SessionId) -> SessionData {
        self.cache.get(&session).await.unwrap_or_default()
    }

    /// Apply `change` to the session's data as one atomic upsert.
    async fn update<F>(&self, session: SessionId, change: F)
    where
        F: FnOnce(&mut SessionData) + Send,
    {
        self.cache
            .entry(session)
            .and_upsert_with(|entry| {
                let mut data = entry.map(Entry::into_value).unwrap_or_default();
                change(&mut data);
                std::future::ready(data)
            })
            .await;
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set_current_order(&self, session: SessionId, order_id: OrderId) {
        self.update(session, |data| data.current_order = Some(order_id)).await;
    }

    async fn current_order(&self, session: SessionId) -> Option<OrderId> {
        self.data(session).await.current_order
    }

    async fn clear(&self, session: SessionId) {
        self.update(session, |data| data.current_order = None).await;
    }

    async fn record_placed_order(&self, session: SessionId, order_id: OrderId) {
        self.update(session, |data| {
            if !data.placed_orders.contains(&order_id) {
                data.placed_orders.push(order_id);
            }
        })
        .await;
    }

    async fn placed_orders(&self, session: SessionId) -> Vec<OrderId> {
        self.data(session).await.placed_orders
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_current_order_roundtrip() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let session = SessionId::generate();
        assert_eq!(store.current_order(session).await, None);

        store.set_current_order(session, OrderId::new(3)).await;
        assert_eq!(store.current_order(session).await, Some(OrderId::new(3)));

        store.clear(session).await;
        assert_eq!(store.current_order(session).await, None);
    }

    #[tokio::test]
    async fn test_placed_orders_survive_clear() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let session = SessionId::generate();
        store.set_current_order(session, OrderId::new(3)).await;
        store.record_placed_order(session, OrderId::new(3)).await;
        store.record_placed_order(session, OrderId::new(3)).await;
        store.clear(session).await;

        assert_eq!(store.placed_orders(session).await, vec![OrderId::new(3)]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let (a, b) = (SessionId::generate(), SessionId::generate());
        store.set_current_order(a, OrderId::new(1)).await;
        assert_eq!(store.current_order(b).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_all_kept() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let session = SessionId::generate();

        let tasks: Vec<_> = (1..=500)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.record_placed_order(session, OrderId::new(id)).await;
                    if id % 2 == 0 {
                        store.set_current_order(session, OrderId::new(id)).await;
                    } else {
                        store.clear(session).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.ok();
        }

        assert_eq!(store.placed_orders(session).await.len(), 500);
    }
}
