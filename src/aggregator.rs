//! Relation aggregator
//!
//! Builds the per-order view: order rows for a store, their line items found
//! through a second, independently resolved binding, and product names from a
//! batched catalog lookup.
//!
//! Only the order fetch decides whether there is anything to show. Item
//! binding, item fetch and name lookup failures all degrade to orders with
//! fewer (or unnamed) items.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use order_types::{
    CustomerIdentity, EntityKind, LineItemRecord, OrderRecord, ResolvedBinding, Role,
    FALLBACK_ITEM_NAME,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Filter, Row, SelectQuery};
use crate::error::ProbeFailure;
use crate::fields::{Field, RowView};
use crate::registry::LookupSpec;
use crate::resolver::{BindingResolver, Diagnostic, ProbeScope, Resolution};

/// Orders plus what was learned while attaching their items
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub orders: Vec<OrderRecord>,
    /// Orders binding plus the identifier columns the fetched rows use
    pub orders_binding: Option<ResolvedBinding>,
    pub items_binding: Option<ResolvedBinding>,
    /// Why items could not be bound, when they could not
    pub items_diagnostic: Option<Diagnostic>,
}

/// Joins orders, line items and product names in memory
#[derive(Clone)]
pub struct RelationAggregator {
    backend: Arc<dyn Backend>,
    resolver: BindingResolver,
}

impl RelationAggregator {
    pub fn new(backend: Arc<dyn Backend>, resolver: BindingResolver) -> Self {
        Self { backend, resolver }
    }

    /// Orders for `context_id` with items attached; empty on any order-fetch failure
    pub async fn aggregate(
        &self,
        orders_binding: &ResolvedBinding,
        context_id: &str,
    ) -> Vec<OrderRecord> {
        self.aggregate_detailed(orders_binding, context_id)
            .await
            .orders
    }

    pub async fn aggregate_detailed(
        &self,
        orders_binding: &ResolvedBinding,
        context_id: &str,
    ) -> Aggregation {
        let Some((write_binding, mut orders)) =
            self.fetch_orders(orders_binding, context_id).await
        else {
            return Aggregation::default();
        };
        if orders.is_empty() {
            return Aggregation {
                orders_binding: Some(write_binding),
                ..Aggregation::default()
            };
        }

        let order_ids: Vec<Value> = orders
            .iter()
            .map(|o| Value::String(o.id.clone()))
            .collect();

        let items_binding = match self
            .resolver
            .resolve_scoped(EntityKind::LineItems, &ProbeScope::AnyOf(order_ids.clone()))
            .await
        {
            Resolution::Resolved(binding) => binding,
            Resolution::Unresolved(diagnostic) => {
                return Aggregation {
                    orders,
                    orders_binding: Some(write_binding),
                    items_binding: None,
                    items_diagnostic: Some(diagnostic),
                };
            }
        };

        let mut items_by_order = self.fetch_items(&items_binding, order_ids).await;
        for order in &mut orders {
            order.items = items_by_order.remove(&order.id).unwrap_or_default();
        }

        info!(
            context = %context_id,
            orders = orders.len(),
            items = orders.iter().map(OrderRecord::item_count).sum::<usize>(),
            "Aggregated orders"
        );

        Aggregation {
            orders,
            orders_binding: Some(write_binding),
            items_binding: Some(items_binding),
            items_diagnostic: None,
        }
    }

    async fn fetch_orders(
        &self,
        binding: &ResolvedBinding,
        context_id: &str,
    ) -> Option<(ResolvedBinding, Vec<OrderRecord>)> {
        let Some(store_column) = binding.column(Role::StoreId) else {
            warn!(binding = %binding, "Orders binding has no store id column");
            return None;
        };

        let query = SelectQuery::new(binding.table_name.clone())
            .filter(Filter::eq(store_column, context_id));

        match self.backend.select(&query).await {
            Ok(rows) => {
                let mut orders: Vec<OrderRecord> = rows
                    .iter()
                    .enumerate()
                    .map(|(idx, row)| order_from_row(row, &binding.table_name, idx))
                    .collect();
                sort_newest_first(&mut orders);
                Some((with_identifier_columns(binding, &rows), orders))
            }
            Err(e) => {
                warn!(table = %binding.table_name, error = %e, "Failed to fetch orders");
                None
            }
        }
    }

    /// Items grouped by order id; empty map on failure
    async fn fetch_items(
        &self,
        binding: &ResolvedBinding,
        order_ids: Vec<Value>,
    ) -> HashMap<String, Vec<LineItemRecord>> {
        let mut grouped: HashMap<String, Vec<LineItemRecord>> = HashMap::new();
        let Some(order_column) = binding.column(Role::OrderId) else {
            return grouped;
        };

        let query = SelectQuery::new(binding.table_name.clone())
            .filter(Filter::is_in(order_column, order_ids));
        let rows = match self.backend.select(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = %binding.table_name, error = %e, "Failed to fetch line items");
                return grouped;
            }
        };

        let item_column = binding.column(Role::ItemId);
        let product_ids: BTreeSet<String> = item_column
            .map(|col| {
                rows.iter()
                    .filter_map(|row| RowView::new(row).column_key(col))
                    .collect()
            })
            .unwrap_or_default();
        let product_names = self
            .lookup_product_names(&self.resolver.registry().products, &product_ids)
            .await;

        for row in &rows {
            let view = RowView::new(row);
            let Some(order_id) = view.column_key(order_column) else {
                continue;
            };
            let item = line_item_from_row(row, binding, &product_names);
            grouped.entry(order_id).or_default().push(item);
        }
        grouped
    }

    /// Product id -> display name from the first catalog table that answers
    async fn lookup_product_names(
        &self,
        catalog: &LookupSpec,
        product_ids: &BTreeSet<String>,
    ) -> HashMap<String, String> {
        if product_ids.is_empty() {
            return HashMap::new();
        }
        let ids: Vec<Value> = product_ids.iter().cloned().map(Value::String).collect();

        for table in &catalog.tables {
            match self
                .backend
                .select_by_ids(table, &catalog.id_column, &ids)
                .await
            {
                Ok(rows) => {
                    debug!(table = %table, found = rows.len(), "Resolved product names");
                    return rows
                        .iter()
                        .filter_map(|row| {
                            let view = RowView::new(row);
                            Some((
                                view.column_key(&catalog.id_column)?,
                                view.text(Field::ProductName)?,
                            ))
                        })
                        .collect();
                }
                Err(e) => {
                    let failure = ProbeFailure::classify(&e);
                    debug!(
                        table = %table,
                        outcome = failure.kind(),
                        "Product catalog candidate rejected"
                    );
                }
            }
        }

        warn!(ids = product_ids.len(), "No product catalog table answered");
        HashMap::new()
    }
}

/// Bind the primary-key and order-number roles to the columns the rows were
/// read from, so writes address orders the same way reads found them.
fn with_identifier_columns(binding: &ResolvedBinding, rows: &[Row]) -> ResolvedBinding {
    let mut binding = binding.clone();
    for (role, field) in [
        (Role::PrimaryKey, Field::OrderId),
        (Role::ExternalNumber, Field::ExternalNumber),
    ] {
        if binding.column(role).is_some() {
            continue;
        }
        if let Some(column) = rows
            .iter()
            .find_map(|row| RowView::new(row).present_column(field))
        {
            binding = binding.with_column(role, column);
        }
    }
    binding
}

/// Map an order row through the field synonyms.
///
/// Rows without any id fall back to their external number, then to a
/// synthetic `table#index` key so they still reach the customer index.
pub fn order_from_row(row: &Row, table: &str, idx: usize) -> OrderRecord {
    let view = RowView::new(row);
    let external_order_number = view.key(Field::ExternalNumber);
    let id = view
        .key(Field::OrderId)
        .or_else(|| external_order_number.clone())
        .unwrap_or_else(|| format!("{}#{}", table, idx));

    OrderRecord {
        id,
        external_order_number,
        status: view.text(Field::Status).unwrap_or_else(|| "pending".to_string()),
        created_at: view.timestamp(Field::CreatedAt),
        total_amount: view.decimal(Field::Total).unwrap_or(Decimal::ZERO),
        customer_identity: CustomerIdentity {
            customer_id: view.key(Field::CustomerId),
            name: view.text(Field::CustomerName),
            phone: view.text(Field::CustomerPhone),
        },
        items: Vec::new(),
    }
}

fn line_item_from_row(
    row: &Row,
    binding: &ResolvedBinding,
    product_names: &HashMap<String, String>,
) -> LineItemRecord {
    let view = RowView::new(row);
    let referenced_product_id = binding
        .column(Role::ItemId)
        .and_then(|col| view.column_key(col));
    let quantity = binding
        .column(Role::Quantity)
        .and_then(|col| view.column_decimal(col))
        .or_else(|| view.decimal(Field::Quantity))
        .unwrap_or(Decimal::ONE);

    let display_name = view
        .text(Field::ItemName)
        .or_else(|| {
            referenced_product_id
                .as_ref()
                .and_then(|id| product_names.get(id).cloned())
        })
        .unwrap_or_else(|| FALLBACK_ITEM_NAME.to_string());

    LineItemRecord {
        id: view.key(Field::LineItemId),
        referenced_product_id,
        quantity,
        display_name,
    }
}

fn sort_newest_first(orders: &mut [OrderRecord]) {
    orders.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::BackendError;
    use crate::registry::CandidateRegistry;
    use crate::resolver::TransientPolicy;
    use serde_json::json;
    use std::str::FromStr;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn orders_binding() -> ResolvedBinding {
        ResolvedBinding::new(EntityKind::StoreOrders, "orders")
            .with_column(Role::StoreId, "store_id")
    }

    async fn seeded() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_table(
                "orders",
                &["id", "store_id", "status", "total", "created_at"],
                vec![
                    row(json!({
                        "id": "o1", "store_id": "s1", "status": "pending", "total": 12,
                        "created_at": "2024-01-01T10:00:00Z"
                    })),
                    row(json!({
                        "id": "o2", "store_id": "s1", "status": "delivered", "total": "8.50",
                        "created_at": "2024-01-02T10:00:00Z"
                    })),
                    row(json!({"id": "o3", "store_id": "s2", "status": "pending", "total": 1})),
                ],
            )
            .await;
        backend
            .create_table(
                "order_items",
                &["id", "order_id", "product_id", "qty", "name"],
                vec![
                    row(json!({"id": 1, "order_id": "o1", "product_id": "p1", "qty": 2})),
                    row(json!({"id": 2, "order_id": "o1", "product_id": "p404", "qty": 1})),
                    row(json!({
                        "id": 3, "order_id": "o1", "product_id": "p2", "qty": 1,
                        "name": "Custom Bread"
                    })),
                ],
            )
            .await;
        backend
            .create_table(
                "products",
                &["id", "name"],
                vec![
                    row(json!({"id": "p1", "name": "Milk"})),
                    row(json!({"id": "p2", "name": "Bread"})),
                ],
            )
            .await;
        backend
    }

    fn aggregator(backend: Arc<InMemoryBackend>) -> RelationAggregator {
        let resolver = BindingResolver::new(
            backend.clone(),
            Arc::new(CandidateRegistry::default()),
            TransientPolicy::Advance,
        );
        RelationAggregator::new(backend, resolver)
    }

    #[tokio::test]
    async fn test_items_attached_with_name_fallbacks() {
        let backend = seeded().await;
        let aggregation = aggregator(backend)
            .aggregate_detailed(&orders_binding(), "s1")
            .await;

        let orders = aggregation.orders;
        assert_eq!(orders.len(), 2);
        // newest first
        assert_eq!(orders[0].id, "o2");
        assert!(orders[0].items.is_empty());

        let names: Vec<&str> = orders[1].items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["Milk", FALLBACK_ITEM_NAME, "Custom Bread"]);
        assert_eq!(orders[1].items[0].quantity, Decimal::from(2));
        assert_eq!(orders[1].total_amount, Decimal::from(12));
        assert_eq!(orders[0].total_amount, Decimal::from_str("8.50").unwrap());

        let items_binding = aggregation.items_binding.unwrap();
        assert_eq!(items_binding.table_name, "order_items");
        assert_eq!(items_binding.column(Role::Quantity), Some("qty"));
    }

    #[tokio::test]
    async fn test_item_failures_keep_orders() {
        let backend = seeded().await;
        backend
            .fail_table("order_items", BackendError::permission_denied("order_items"))
            .await;

        let aggregation = aggregator(backend)
            .aggregate_detailed(&orders_binding(), "s1")
            .await;

        assert_eq!(aggregation.orders.len(), 2);
        assert!(aggregation.orders.iter().all(|o| o.items.is_empty()));
        assert!(aggregation.items_diagnostic.is_some());
    }

    #[tokio::test]
    async fn test_catalog_failure_falls_back_to_item_label() {
        let backend = seeded().await;
        backend
            .fail_table("products", BackendError::new("connection reset"))
            .await;

        let orders = aggregator(backend).aggregate(&orders_binding(), "s1").await;
        let o1 = orders.iter().find(|o| o.id == "o1").unwrap();
        let names: Vec<&str> = o1.items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec![FALLBACK_ITEM_NAME, FALLBACK_ITEM_NAME, "Custom Bread"]);
    }

    #[tokio::test]
    async fn test_order_fetch_failure_is_empty() {
        let backend = seeded().await;
        backend
            .fail_table("orders", BackendError::new("timeout"))
            .await;

        let orders = aggregator(backend).aggregate(&orders_binding(), "s1").await;
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_binding_records_identifier_columns() {
        let backend = seeded().await;
        let aggregation = aggregator(backend.clone())
            .aggregate_detailed(&orders_binding(), "s1")
            .await;
        let binding = aggregation.orders_binding.unwrap();
        assert_eq!(binding.column(Role::PrimaryKey), Some("id"));
        assert_eq!(binding.column(Role::ExternalNumber), None);

        backend
            .create_table(
                "keyed_orders",
                &["order_id", "store_id", "order_no"],
                vec![row(json!({"order_id": 7, "store_id": "s1", "order_no": "A-7"}))],
            )
            .await;
        let keyed = ResolvedBinding::new(EntityKind::StoreOrders, "keyed_orders")
            .with_column(Role::StoreId, "store_id");
        let aggregation = aggregator(backend).aggregate_detailed(&keyed, "s1").await;

        assert_eq!(aggregation.orders[0].id, "7");
        let binding = aggregation.orders_binding.unwrap();
        assert_eq!(binding.column(Role::PrimaryKey), Some("order_id"));
        assert_eq!(binding.column(Role::ExternalNumber), Some("order_no"));
    }

    #[test]
    fn test_order_from_row_synthesises_id() {
        let r = row(json!({"status": "pending", "customer_phone": "555"}));
        let order = order_from_row(&r, "orders", 4);
        assert_eq!(order.id, "orders#4");
        assert_eq!(order.customer_identity.phone.as_deref(), Some("555"));
        assert!(order.items.is_empty());
    }
}
