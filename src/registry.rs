//! Candidate registry
//!
//! Static, ordered lists of the table and column names an operator backend
//! might use for each logical entity. Order matters: the resolver walks these
//! lists front to back and keeps the first combination that works, so the most
//! specific names come first.

use std::collections::BTreeMap;

use order_types::{EntityKind, Role};
use serde::{Deserialize, Serialize};

const STORE_ORDER_TABLES: &[&str] = &[
    "grocery_orders",
    "orders_grocery",
    "store_orders",
    "orders",
];
const STORE_ORDER_STORE_ID: &[&str] = &[
    "store_id",
    "grocery_store_id",
    "restaurant_id",
    "shop_id",
    "vendor_id",
];
const STORE_ORDER_PRIMARY_KEY: &[&str] = &["id", "order_id"];
const STORE_ORDER_EXTERNAL_NUMBER: &[&str] = &["order_number", "order_no", "number"];

const LINE_ITEM_TABLES: &[&str] = &[
    "grocery_order_items",
    "order_items_grocery",
    "store_order_items",
    "order_items",
];
const LINE_ITEM_ORDER_ID: &[&str] = &["order_id", "grocery_order_id", "store_order_id"];
const LINE_ITEM_ITEM_ID: &[&str] = &[
    "product_id",
    "item_id",
    "grocery_product_id",
    "menu_item_id",
];
const LINE_ITEM_QUANTITY: &[&str] = &["quantity", "qty"];

const PRODUCT_TABLES: &[&str] = &["grocery_products", "products", "menu_items", "items"];
const PROFILE_TABLES: &[&str] = &["profiles", "users", "customers"];

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// One concrete (table, columns) combination to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub table: String,
    /// Role columns in probe order
    pub columns: Vec<(Role, String)>,
}

impl Candidate {
    pub fn column(&self, role: Role) -> Option<&str> {
        self.columns
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, c)| c.as_str())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn columns_by_role(&self) -> BTreeMap<Role, String> {
        self.columns.iter().cloned().collect()
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cols: Vec<&str> = self.columns.iter().map(|(_, c)| c.as_str()).collect();
        write!(f, "{}({})", self.table, cols.join(","))
    }
}

/// Table and column candidates for one logical entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSpec {
    pub entity_kind: EntityKind,
    pub tables: Vec<String>,
    /// Roles validated by probing, outermost first
    pub probe_roles: Vec<(Role, Vec<String>)>,
    /// Roles used as-is for writes (first name wins, no probing)
    pub write_roles: Vec<(Role, Vec<String>)>,
}

impl CandidateSpec {
    pub fn store_orders() -> Self {
        Self {
            entity_kind: EntityKind::StoreOrders,
            tables: owned(STORE_ORDER_TABLES),
            probe_roles: vec![(Role::StoreId, owned(STORE_ORDER_STORE_ID))],
            write_roles: vec![
                (Role::PrimaryKey, owned(STORE_ORDER_PRIMARY_KEY)),
                (Role::ExternalNumber, owned(STORE_ORDER_EXTERNAL_NUMBER)),
            ],
        }
    }

    pub fn line_items() -> Self {
        Self {
            entity_kind: EntityKind::LineItems,
            tables: owned(LINE_ITEM_TABLES),
            probe_roles: vec![
                (Role::OrderId, owned(LINE_ITEM_ORDER_ID)),
                (Role::ItemId, owned(LINE_ITEM_ITEM_ID)),
                (Role::Quantity, owned(LINE_ITEM_QUANTITY)),
            ],
            write_roles: Vec::new(),
        }
    }

    /// Column names registered for `role` (probe or write)
    pub fn role_columns(&self, role: Role) -> &[String] {
        self.probe_roles
            .iter()
            .chain(self.write_roles.iter())
            .find(|(r, _)| *r == role)
            .map(|(_, cols)| cols.as_slice())
            .unwrap_or(&[])
    }

    /// Every probe candidate in enumeration order: table-major, then the
    /// cartesian product of role columns with the first role outermost.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut combos: Vec<Vec<(Role, String)>> = vec![Vec::new()];
        for (role, columns) in &self.probe_roles {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    columns.iter().map(move |column| {
                        let mut next = prefix.clone();
                        next.push((*role, column.clone()));
                        next
                    })
                })
                .collect();
        }

        self.tables
            .iter()
            .flat_map(|table| {
                combos.iter().map(move |columns| Candidate {
                    table: table.clone(),
                    columns: columns.clone(),
                })
            })
            .collect()
    }

    /// Replace the tables and/or role columns named in `over`
    pub fn apply_override(&mut self, over: &CandidateOverride) {
        if let Some(tables) = &over.tables {
            self.tables = tables.clone();
        }
        for (role, columns) in &over.columns {
            let slot = self
                .probe_roles
                .iter_mut()
                .chain(self.write_roles.iter_mut())
                .find(|(r, _)| r == role);
            match slot {
                Some((_, existing)) => *existing = columns.clone(),
                None => self.write_roles.push((*role, columns.clone())),
            }
        }
    }
}

/// Batched by-id lookup target (product catalog, profiles)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    /// Tables tried in order; the first one that answers is used
    pub tables: Vec<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl LookupSpec {
    pub fn products() -> Self {
        Self {
            tables: owned(PRODUCT_TABLES),
            id_column: default_id_column(),
        }
    }

    pub fn profiles() -> Self {
        Self {
            tables: owned(PROFILE_TABLES),
            id_column: default_id_column(),
        }
    }
}

/// Config-supplied replacement for parts of a [`CandidateSpec`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOverride {
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub columns: BTreeMap<Role, Vec<String>>,
}

/// All candidate specs the engine knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRegistry {
    store_orders: CandidateSpec,
    line_items: CandidateSpec,
    pub products: LookupSpec,
    pub profiles: LookupSpec,
}

impl Default for CandidateRegistry {
    fn default() -> Self {
        Self {
            store_orders: CandidateSpec::store_orders(),
            line_items: CandidateSpec::line_items(),
            products: LookupSpec::products(),
            profiles: LookupSpec::profiles(),
        }
    }
}

impl CandidateRegistry {
    pub fn spec(&self, kind: EntityKind) -> &CandidateSpec {
        match kind {
            EntityKind::StoreOrders => &self.store_orders,
            EntityKind::LineItems => &self.line_items,
        }
    }

    pub fn spec_mut(&mut self, kind: EntityKind) -> &mut CandidateSpec {
        match kind {
            EntityKind::StoreOrders => &mut self.store_orders,
            EntityKind::LineItems => &mut self.line_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_order_candidates_are_table_major() {
        let spec = CandidateSpec::store_orders();
        let candidates = spec.candidates();

        assert_eq!(candidates.len(), STORE_ORDER_TABLES.len() * STORE_ORDER_STORE_ID.len());
        assert_eq!(candidates[0].to_string(), "grocery_orders(store_id)");
        assert_eq!(candidates[1].to_string(), "grocery_orders(grocery_store_id)");
        assert_eq!(
            candidates[STORE_ORDER_STORE_ID.len()].to_string(),
            "orders_grocery(store_id)"
        );
    }

    #[test]
    fn test_line_item_candidates_nest_roles_in_order() {
        let spec = CandidateSpec::line_items();
        let candidates = spec.candidates();

        assert_eq!(candidates.len(), 4 * 3 * 4 * 2);
        assert_eq!(
            candidates[0].to_string(),
            "grocery_order_items(order_id,product_id,quantity)"
        );
        assert_eq!(
            candidates[1].to_string(),
            "grocery_order_items(order_id,product_id,qty)"
        );
        assert_eq!(
            candidates[2].to_string(),
            "grocery_order_items(order_id,item_id,quantity)"
        );
        assert_eq!(candidates[0].column(Role::Quantity), Some("quantity"));
    }

    #[test]
    fn test_override_replaces_tables_and_roles() {
        let mut spec = CandidateSpec::store_orders();
        let mut over = CandidateOverride {
            tables: Some(vec!["shop_orders".to_string()]),
            ..Default::default()
        };
        over.columns
            .insert(Role::StoreId, vec!["tenant_store".to_string()]);
        over.columns
            .insert(Role::ExternalNumber, vec!["ref_code".to_string()]);

        spec.apply_override(&over);

        assert_eq!(spec.candidates().len(), 1);
        assert_eq!(spec.candidates()[0].to_string(), "shop_orders(tenant_store)");
        assert_eq!(spec.role_columns(Role::ExternalNumber), ["ref_code".to_string()]);
        assert_eq!(spec.role_columns(Role::PrimaryKey), ["id".to_string(), "order_id".to_string()]);
    }
}
