//! Store sessions and the engine facade
//!
//! A [`StoreSession`] is everything that lives for one store selection: the
//! resolved orders binding (written once), the latest snapshot, and the
//! change coalescer. Selecting another store drops the session and with it
//! every piece of per-store state; there are no process-wide trackers.
//!
//! Concurrency rules:
//! - the orders binding sits in a `tokio::sync::OnceCell`, so concurrent
//!   refreshes wait on one resolution instead of interleaving probes;
//! - every refresh takes a generation number and only publishes if no newer
//!   refresh or confirmed status write happened meanwhile;
//! - snapshot locks are only held to swap an `Arc`, never across backend calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use order_types::{CustomerAggregate, EntityKind, OrderRecord, ResolvedBinding};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::aggregator::RelationAggregator;
use crate::backend::Backend;
use crate::coalesce::ChangeCoalescer;
use crate::config::EngineConfig;
use crate::customers::{group_orders, sort_by_recency, CustomerIndexBuilder};
use crate::error::MutationFailure;
use crate::mutation::{MutationOutcome, MutationRouter};
use crate::resolver::{BindingResolver, Diagnostic, Resolution};
use crate::status::StatusClasses;

/// What the UI renders for one store
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub orders: Vec<OrderRecord>,
    pub customers: Vec<CustomerAggregate>,
    pub orders_binding: Option<ResolvedBinding>,
    pub items_binding: Option<ResolvedBinding>,
    /// Operator-facing note when orders or items could not be bound
    pub diagnostic: Option<String>,
}

/// Engine components shared by every session
#[derive(Clone)]
pub struct EngineServices {
    pub resolver: BindingResolver,
    pub aggregator: RelationAggregator,
    pub customers: CustomerIndexBuilder,
    pub mutations: MutationRouter,
    pub status_classes: StatusClasses,
    pub coalesce_window: Duration,
}

impl EngineServices {
    pub fn new(backend: Arc<dyn Backend>, config: &EngineConfig) -> Self {
        let registry = Arc::new(config.registry());
        let resolver =
            BindingResolver::new(backend.clone(), registry.clone(), config.transient_policy);
        Self {
            aggregator: RelationAggregator::new(backend.clone(), resolver.clone()),
            customers: CustomerIndexBuilder::new(
                backend.clone(),
                registry.profiles.clone(),
                config.status_classes.clone(),
            ),
            mutations: MutationRouter::new(backend, registry, config.status_column.clone()),
            resolver,
            status_classes: config.status_classes.clone(),
            coalesce_window: config.coalesce_window(),
        }
    }
}

/// State scoped to one selected store
pub struct StoreSession {
    store_id: String,
    services: EngineServices,
    binding: OnceCell<ResolvedBinding>,
    last_diagnostic: Mutex<Option<Diagnostic>>,
    generation: AtomicU64,
    snapshot: RwLock<Arc<Snapshot>>,
    coalescer: OnceLock<ChangeCoalescer>,
}

impl StoreSession {
    /// Create a session and start its change coalescer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(store_id: impl Into<String>, services: EngineServices) -> Arc<Self> {
        let window = services.coalesce_window;
        let session = Arc::new(Self {
            store_id: store_id.into(),
            services,
            binding: OnceCell::new(),
            last_diagnostic: Mutex::new(None),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            coalescer: OnceLock::new(),
        });

        let weak = Arc::downgrade(&session);
        let coalescer = ChangeCoalescer::spawn(window, move || {
            let weak = weak.clone();
            async move {
                if let Some(session) = weak.upgrade() {
                    session.refresh().await;
                }
            }
        });
        let _ = session.coalescer.set(coalescer);

        info!(store = %session.store_id, "Opened store session");
        session
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// The orders binding, resolving it on first use.
    ///
    /// A failed resolution is not cached; the next call probes again.
    pub async fn binding(&self) -> Option<ResolvedBinding> {
        let result = self
            .binding
            .get_or_try_init(|| async {
                match self
                    .services
                    .resolver
                    .resolve(EntityKind::StoreOrders, &self.store_id)
                    .await
                {
                    Resolution::Resolved(binding) => Ok(binding),
                    Resolution::Unresolved(diagnostic) => Err(diagnostic),
                }
            })
            .await;

        match result {
            Ok(binding) => Some(binding.clone()),
            Err(diagnostic) => {
                *self.last_diagnostic.lock().await = Some(diagnostic);
                None
            }
        }
    }

    /// Latest diagnostic from a failed orders resolution
    pub async fn diagnostic(&self) -> Option<Diagnostic> {
        self.last_diagnostic.lock().await.clone()
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    /// Run resolve -> aggregate -> index and publish the result.
    ///
    /// Returns the snapshot that is current afterwards, which is this run's
    /// own unless a newer refresh superseded it.
    pub async fn refresh(&self) -> Arc<Snapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let next = match self.binding().await {
            None => Snapshot {
                generation,
                diagnostic: self.diagnostic().await.map(|d| d.to_string()),
                ..Snapshot::default()
            },
            Some(binding) => {
                let aggregation = self
                    .services
                    .aggregator
                    .aggregate_detailed(&binding, &self.store_id)
                    .await;
                let customers = self.services.customers.build_index(&aggregation.orders).await;
                Snapshot {
                    generation,
                    orders: aggregation.orders,
                    customers,
                    orders_binding: aggregation.orders_binding.or(Some(binding)),
                    items_binding: aggregation.items_binding,
                    diagnostic: aggregation.items_diagnostic.map(|d| d.to_string()),
                }
            }
        };

        self.publish(next).await
    }

    async fn publish(&self, next: Snapshot) -> Arc<Snapshot> {
        let mut current = self.snapshot.write().await;
        let latest = self.generation.load(Ordering::SeqCst);
        if next.generation != latest {
            debug!(
                store = %self.store_id,
                generation = next.generation,
                latest,
                "Discarding superseded refresh"
            );
            return current.clone();
        }
        *current = Arc::new(next);
        current.clone()
    }

    /// Signal an out-of-band change; bursts collapse into one refresh
    pub fn notify_change(&self) {
        if let Some(coalescer) = self.coalescer.get() {
            coalescer.notify();
        }
    }

    /// Write a status through the session's binding and patch the snapshot.
    ///
    /// Uses the identifier columns learned by the last refresh when there is
    /// one, so the write addresses the order the way it was read.
    pub async fn set_status(
        &self,
        order_id: &str,
        new_status: &str,
    ) -> Result<MutationOutcome, MutationFailure> {
        let snapshot_binding = self.snapshot.read().await.orders_binding.clone();
        let binding = match snapshot_binding {
            Some(binding) => Some(binding),
            None => self.binding().await,
        };
        let Some(binding) = binding else {
            return Err(MutationFailure {
                table: String::new(),
                order_id: order_id.to_string(),
                message: format!("orders table for store {} is unresolved", self.store_id),
            });
        };

        let external_number = self
            .snapshot
            .read()
            .await
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .and_then(|o| o.external_order_number.clone());

        let outcome = self
            .services
            .mutations
            .set_status_with_number(&binding, order_id, external_number.as_deref(), new_status)
            .await?;

        self.apply_status_locally(order_id, new_status).await;
        Ok(outcome)
    }

    /// Optimistic snapshot update after a confirmed write.
    ///
    /// The patch takes a fresh generation, so refreshes that started before
    /// the write cannot publish over it; the next refresh replaces it.
    async fn apply_status_locally(&self, order_id: &str, new_status: &str) {
        let mut current = self.snapshot.write().await;

        let mut orders = current.orders.clone();
        let mut touched = false;
        for order in orders
            .iter_mut()
            .filter(|o| o.id == order_id || o.external_order_number.as_deref() == Some(order_id))
        {
            order.status = new_status.to_string();
            touched = true;
        }
        if !touched {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let customers =
            rebuild_customers(&orders, &current.customers, &self.services.status_classes);
        let mut next = (**current).clone();
        next.generation = generation;
        next.orders = orders;
        next.customers = customers;
        *current = Arc::new(next);
    }
}

/// Regroup `orders`, keeping names and avatars from the previous index
fn rebuild_customers(
    orders: &[OrderRecord],
    previous: &[CustomerAggregate],
    classes: &StatusClasses,
) -> Vec<CustomerAggregate> {
    let known: HashMap<&str, &CustomerAggregate> =
        previous.iter().map(|a| (a.group_key.as_str(), a)).collect();

    let mut customers = group_orders(orders, classes);
    for aggregate in &mut customers {
        if let Some(old) = known.get(aggregate.group_key.as_str()) {
            aggregate.display_name = old.display_name.clone();
            aggregate.avatar_url = old.avatar_url.clone();
        }
    }
    sort_by_recency(&mut customers);
    customers
}

/// Entry point for the UI: one active store session at a time
pub struct OrderEngine {
    services: EngineServices,
    current: RwLock<Option<Arc<StoreSession>>>,
}

impl OrderEngine {
    pub fn new(backend: Arc<dyn Backend>, config: &EngineConfig) -> Self {
        Self {
            services: EngineServices::new(backend, config),
            current: RwLock::new(None),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Switch to `store_id`, tearing down the previous session.
    ///
    /// Re-selecting the active store keeps its session and binding.
    pub async fn select_store(&self, store_id: &str) -> Arc<StoreSession> {
        let mut current = self.current.write().await;
        if let Some(session) = current.as_ref().filter(|s| s.store_id() == store_id) {
            return session.clone();
        }
        let session = StoreSession::open(store_id, self.services.clone());
        if let Some(previous) = current.replace(session.clone()) {
            info!(from = %previous.store_id(), to = %store_id, "Switched store");
        }
        session
    }

    pub async fn current(&self) -> Option<Arc<StoreSession>> {
        self.current.read().await.clone()
    }

    /// Forward a change signal to the active session
    pub async fn notify_change(&self) {
        if let Some(session) = self.current().await {
            session.notify_change();
        }
    }

    pub async fn resolve(&self, kind: EntityKind, context_id: &str) -> Resolution {
        self.services.resolver.resolve(kind, context_id).await
    }

    pub async fn aggregate(&self, binding: &ResolvedBinding, context_id: &str) -> Vec<OrderRecord> {
        self.services.aggregator.aggregate(binding, context_id).await
    }

    pub async fn build_index(&self, orders: &[OrderRecord]) -> Vec<CustomerAggregate> {
        self.services.customers.build_index(orders).await
    }

    pub async fn set_status(
        &self,
        binding: &ResolvedBinding,
        order_id: &str,
        new_status: &str,
    ) -> Result<MutationOutcome, MutationFailure> {
        self.services
            .mutations
            .set_status(binding, order_id, new_status)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, Row};
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_table(
                "orders",
                &[
                    "id",
                    "order_number",
                    "store_id",
                    "status",
                    "total",
                    "customer_phone",
                    "created_at",
                ],
                vec![
                    row(json!({
                        "id": "o1", "order_number": "1001", "store_id": "s1", "status": "pending",
                        "total": 10, "customer_phone": "111", "created_at": "2024-02-01T08:00:00Z"
                    })),
                    row(json!({
                        "id": "o2", "order_number": "1002", "store_id": "s1", "status": "pending",
                        "total": 20, "customer_phone": "111", "created_at": "2024-02-02T08:00:00Z"
                    })),
                ],
            )
            .await;
        backend
    }

    #[tokio::test]
    async fn test_refresh_builds_snapshot() {
        let engine = OrderEngine::new(backend().await, &EngineConfig::default());
        let session = engine.select_store("s1").await;

        let snapshot = session.refresh().await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.orders.len(), 2);
        assert_eq!(snapshot.customers.len(), 1);
        assert_eq!(snapshot.customers[0].orders_count, 2);
        // no line-item table exists at all
        assert!(snapshot.orders.iter().all(|o| o.items.is_empty()));
        assert!(snapshot.diagnostic.as_deref().unwrap().contains("line_items"));
    }

    #[tokio::test]
    async fn test_set_status_patches_snapshot_and_regroups() {
        let engine = OrderEngine::new(backend().await, &EngineConfig::default());
        let session = engine.select_store("s1").await;
        session.refresh().await;

        session.set_status("o2", "cancelled").await.unwrap();

        let snapshot = session.snapshot().await;
        let o2 = snapshot.orders.iter().find(|o| o.id == "o2").unwrap();
        assert_eq!(o2.status, "cancelled");
        assert_eq!(snapshot.customers[0].rejected_count, 1);
        assert_eq!(snapshot.customers[0].revenue_total, rust_decimal::Decimal::from(10));
    }

    #[tokio::test]
    async fn test_unresolved_store_gives_empty_snapshot() {
        let empty = Arc::new(InMemoryBackend::new());
        let engine = OrderEngine::new(empty, &EngineConfig::default());
        let session = engine.select_store("s1").await;

        let snapshot = session.refresh().await;
        assert!(snapshot.orders.is_empty());
        assert!(snapshot.orders_binding.is_none());
        assert!(snapshot.diagnostic.as_deref().unwrap().contains("store_orders"));

        let err = session.set_status("o1", "delivered").await.unwrap_err();
        assert!(err.message.contains("unresolved"));
    }

    #[tokio::test]
    async fn test_reselecting_same_store_keeps_session() {
        let engine = OrderEngine::new(backend().await, &EngineConfig::default());
        let first = engine.select_store("s1").await;
        let again = engine.select_store("s1").await;
        assert!(Arc::ptr_eq(&first, &again));

        let other = engine.select_store("s2").await;
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(engine.current().await.unwrap().store_id(), "s2");
    }
}
