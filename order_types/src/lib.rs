//! Order Types - Level 1 Foundation Types
//!
//! Pure data structures shared by the order engine and whatever UI layer sits
//! on top of it. Nothing in here talks to a backend.
//!
//! ## Contents
//!
//! - Logical entity kinds and column roles
//! - Resolved (table, column-set) bindings
//! - Order, line item and customer aggregate snapshots
//! - Revenue chart buckets
//!
//! ## Rules
//!
//! 1. **NO BACKEND ACCESS** - only data structures and small accessors
//! 2. **NO WORKSPACE DEPENDENCIES**
//! 3. **SERIALIZABLE** - every type supports serde so snapshots can be shipped to a UI

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display name used for a line item when neither the stored row nor the
/// product catalog provides one.
pub const FALLBACK_ITEM_NAME: &str = "Item";

// ============================================================================
// LOGICAL ENTITIES AND ROLES
// ============================================================================

/// A conceptual table whose concrete name/shape is discovered at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Orders placed against a store
    StoreOrders,
    /// Line items belonging to a store order
    LineItems,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::StoreOrders => "store_orders",
            EntityKind::LineItems => "line_items",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The part a column plays in a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Foreign key from an order to its store
    StoreId,
    /// Foreign key from a line item to its order
    OrderId,
    /// Foreign key from a line item to the product catalog
    ItemId,
    /// Quantity of a line item
    Quantity,
    /// Primary identifier of an order row (writes)
    PrimaryKey,
    /// Human-facing order number (write fallback)
    ExternalNumber,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::StoreId => "store_id",
            Role::OrderId => "order_id",
            Role::ItemId => "item_id",
            Role::Quantity => "quantity",
            Role::PrimaryKey => "primary_key",
            Role::ExternalNumber => "external_number",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// BINDINGS
// ============================================================================

/// The winning (table, column-set) combination discovered for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBinding {
    pub entity_kind: EntityKind,
    pub table_name: String,
    pub columns_by_role: BTreeMap<Role, String>,
}

impl ResolvedBinding {
    pub fn new(entity_kind: EntityKind, table_name: impl Into<String>) -> Self {
        Self {
            entity_kind,
            table_name: table_name.into(),
            columns_by_role: BTreeMap::new(),
        }
    }

    /// Builder-style role assignment
    pub fn with_column(mut self, role: Role, column: impl Into<String>) -> Self {
        self.columns_by_role.insert(role, column.into());
        self
    }

    /// Column bound to `role`, if the binding carries one
    pub fn column(&self, role: Role) -> Option<&str> {
        self.columns_by_role.get(&role).map(String::as_str)
    }
}

impl std::fmt::Display for ResolvedBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.table_name)?;
        for (i, (role, column)) in self.columns_by_role.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", role, column)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// ORDER SNAPSHOTS
// ============================================================================

/// Who placed an order, as far as the row tells us
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    /// Stable customer/user id
    pub customer_id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRecord {
    pub id: Option<String>,
    pub referenced_product_id: Option<String>,
    pub quantity: Decimal,
    pub display_name: String,
}

/// A store order with its line items attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub external_order_number: Option<String>,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub total_amount: Decimal,
    pub customer_identity: CustomerIdentity,
    /// Always present; empty when the order has no resolvable items
    #[serde(default)]
    pub items: Vec<LineItemRecord>,
}

impl OrderRecord {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external_order_number: None,
            status: status.into(),
            created_at: None,
            total_amount: Decimal::ZERO,
            customer_identity: CustomerIdentity::default(),
            items: Vec::new(),
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

// ============================================================================
// DERIVED AGGREGATES
// ============================================================================

/// Customer-centric rollup of orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregate {
    pub group_key: String,
    /// Stable customer id when the group was keyed by one
    pub customer_id: Option<String>,
    pub display_name: String,
    pub phone: String,
    pub avatar_url: Option<String>,
    pub orders_count: u32,
    pub delivered_count: u32,
    pub rejected_count: u32,
    pub revenue_total: Decimal,
    pub first_order_at: Option<DateTime<Utc>>,
    pub last_order_at: Option<DateTime<Utc>>,
    pub orders: Vec<OrderRecord>,
}

/// One day of order activity for charting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub day: NaiveDate,
    pub orders_count: u32,
    pub revenue_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_display_lists_roles_in_order() {
        let binding = ResolvedBinding::new(EntityKind::LineItems, "order_items")
            .with_column(Role::Quantity, "qty")
            .with_column(Role::OrderId, "order_id");

        assert_eq!(binding.to_string(), "order_items(order_id=order_id, quantity=qty)");
        assert_eq!(binding.column(Role::Quantity), Some("qty"));
        assert_eq!(binding.column(Role::StoreId), None);
    }

    #[test]
    fn test_order_items_default_on_deserialize() {
        let order: OrderRecord = serde_json::from_value(serde_json::json!({
            "id": "o1",
            "external_order_number": null,
            "status": "pending",
            "created_at": null,
            "total_amount": "12.50",
            "customer_identity": {"customer_id": null, "name": null, "phone": null}
        }))
        .unwrap();

        assert!(order.items.is_empty());
    }
}
