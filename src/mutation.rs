//! Mutation router
//!
//! Status writes go to the table of the resolved orders binding and nowhere
//! else. The primary identifier column is tried first; a zero-row update or an
//! error gets exactly one retry on the secondary (human order number) column.

use std::sync::Arc;

use order_types::{EntityKind, ResolvedBinding, Role};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{Backend, Filter, Row};
use crate::error::MutationFailure;
use crate::registry::CandidateRegistry;

/// Which column a successful write matched on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub column: String,
    pub affected: u64,
}

/// Applies status changes through a resolved binding
#[derive(Clone)]
pub struct MutationRouter {
    backend: Arc<dyn Backend>,
    registry: Arc<CandidateRegistry>,
    status_column: String,
}

impl MutationRouter {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<CandidateRegistry>,
        status_column: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            status_column: status_column.into(),
        }
    }

    fn identifier_column(&self, binding: &ResolvedBinding, role: Role) -> Option<String> {
        binding.column(role).map(str::to_string).or_else(|| {
            self.registry
                .spec(EntityKind::StoreOrders)
                .role_columns(role)
                .first()
                .cloned()
        })
    }

    /// Set the status of `order_id`, matching it on both identifier columns
    pub async fn set_status(
        &self,
        binding: &ResolvedBinding,
        order_id: &str,
        new_status: &str,
    ) -> Result<MutationOutcome, MutationFailure> {
        self.set_status_with_number(binding, order_id, None, new_status)
            .await
    }

    /// Like [`set_status`](Self::set_status), retrying with `external_number`
    /// (or `order_id` itself when unknown) on the secondary column
    pub async fn set_status_with_number(
        &self,
        binding: &ResolvedBinding,
        order_id: &str,
        external_number: Option<&str>,
        new_status: &str,
    ) -> Result<MutationOutcome, MutationFailure> {
        let table = binding.table_name.as_str();
        let mut patch = Row::new();
        patch.insert(
            self.status_column.clone(),
            Value::String(new_status.to_string()),
        );

        let attempts = [
            (self.identifier_column(binding, Role::PrimaryKey), order_id),
            (
                self.identifier_column(binding, Role::ExternalNumber),
                external_number.unwrap_or(order_id),
            ),
        ];

        let mut last_error = format!("no identifier column configured for {}", table);
        for (column, value) in attempts {
            let Some(column) = column else {
                continue;
            };
            let filter = Filter::eq(column.clone(), value);
            match self.backend.update(table, &patch, &filter).await {
                Ok(affected) if affected > 0 => {
                    info!(
                        table,
                        column = %column,
                        order_id,
                        status = new_status,
                        "Order status updated"
                    );
                    return Ok(MutationOutcome { column, affected });
                }
                Ok(_) => {
                    last_error = format!("no rows matched {} = {}", column, value);
                }
                Err(e) => {
                    last_error = e.message.clone();
                }
            }
            warn!(
                table,
                column = %column,
                order_id,
                error = %last_error,
                "Status update attempt failed"
            );
        }

        Err(MutationFailure {
            table: table.to_string(),
            order_id: order_id.to_string(),
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::BackendError;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn pending(id: impl Into<Value>, number: &str) -> Row {
        row(json!({"id": id.into(), "order_number": number, "status": "pending"}))
    }

    fn binding() -> ResolvedBinding {
        ResolvedBinding::new(EntityKind::StoreOrders, "orders")
            .with_column(Role::StoreId, "store_id")
    }

    async fn router_with(rows: Vec<Row>) -> (Arc<InMemoryBackend>, MutationRouter) {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_table("orders", &["id", "order_number", "store_id", "status"], rows)
            .await;
        let registry = Arc::new(CandidateRegistry::default());
        let router = MutationRouter::new(backend.clone(), registry, "status");
        (backend, router)
    }

    #[tokio::test]
    async fn test_primary_column_hit() {
        let (backend, router) = router_with(vec![pending("o1", "1001")]).await;

        let outcome = router.set_status(&binding(), "o1", "delivered").await.unwrap();
        assert_eq!(outcome.column, "id");
        assert_eq!(backend.rows("orders").await[0]["status"], json!("delivered"));
    }

    #[tokio::test]
    async fn test_retries_secondary_after_zero_rows() {
        let (backend, router) = router_with(vec![pending("o1", "1001")]).await;

        let outcome = router
            .set_status(&binding(), "1001", "preparing")
            .await
            .unwrap();
        assert_eq!(outcome.column, "order_number");

        let updates: Vec<String> = backend
            .probe_log()
            .await
            .into_iter()
            .filter(|e| e.operation == "update")
            .map(|e| e.table)
            .collect();
        assert_eq!(updates, vec!["orders".to_string(), "orders".to_string()]);
    }

    #[tokio::test]
    async fn test_both_attempts_fail() {
        let (backend, router) = router_with(vec![]).await;
        let err = router.set_status(&binding(), "missing", "delivered").await.unwrap_err();
        assert_eq!(err.message, "no rows matched order_number = missing");

        backend
            .fail_table("orders", BackendError::permission_denied("orders"))
            .await;
        let err = router.set_status(&binding(), "o1", "delivered").await.unwrap_err();
        assert_eq!(err.message, "permission denied for table orders");
        assert_eq!(err.table, "orders");
    }

    #[tokio::test]
    async fn test_external_number_used_for_retry() {
        let (_backend, router) = router_with(vec![pending(7, "A-7")]).await;

        let outcome = router
            .set_status_with_number(&binding(), "stale-id", Some("A-7"), "rejected")
            .await
            .unwrap();
        assert_eq!(outcome.column, "order_number");
        assert_eq!(outcome.affected, 1);
    }
}
