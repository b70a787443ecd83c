//! Customer index builder
//!
//! Groups an order snapshot into one aggregate per customer and enriches the
//! groups that carry a stable customer id from the profile table.

use std::collections::HashMap;
use std::sync::Arc;

use order_types::{CustomerAggregate, OrderRecord};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::fields::{Field, RowView};
use crate::registry::LookupSpec;
use crate::status::{StatusClass, StatusClasses};

/// Digits only, so "+1 (999) 000-1111" and "19990001111" group together
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Grouping key for one order.
///
/// Precedence: stable customer id, phone, display name, then a key derived
/// from the order itself so every order lands in exactly one group.
pub fn group_key(order: &OrderRecord) -> String {
    let identity = &order.customer_identity;
    if let Some(id) = identity.customer_id.as_deref().filter(|s| !s.trim().is_empty()) {
        return format!("id:{}", id.trim());
    }
    if let Some(phone) = identity
        .phone
        .as_deref()
        .map(normalize_phone)
        .filter(|p| !p.is_empty())
    {
        return format!("phone:{}", phone);
    }
    if let Some(name) = identity.name.as_deref().filter(|s| !s.trim().is_empty()) {
        return format!("name:{}", name.trim().to_lowercase());
    }
    format!(
        "anon:{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, order.id.as_bytes())
    )
}

fn new_aggregate(key: String, order: &OrderRecord) -> CustomerAggregate {
    let identity = &order.customer_identity;
    CustomerAggregate {
        group_key: key,
        customer_id: identity.customer_id.clone(),
        display_name: String::new(),
        phone: identity.phone.clone().unwrap_or_default(),
        avatar_url: None,
        orders_count: 0,
        delivered_count: 0,
        rejected_count: 0,
        revenue_total: Decimal::ZERO,
        first_order_at: None,
        last_order_at: None,
        orders: Vec::new(),
    }
}

/// True when the aggregate's name carries no information yet
fn name_is_placeholder(aggregate: &CustomerAggregate) -> bool {
    let name = aggregate.display_name.trim();
    name.is_empty() || (!aggregate.phone.is_empty() && name == aggregate.phone.trim())
}

/// Pure grouping step; output order is unspecified
pub fn group_orders(orders: &[OrderRecord], classes: &StatusClasses) -> Vec<CustomerAggregate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<CustomerAggregate> = Vec::new();

    for order in orders {
        let key = group_key(order);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(new_aggregate(key, order));
            groups.len() - 1
        });
        let aggregate = &mut groups[slot];
        let identity = &order.customer_identity;

        aggregate.orders_count += 1;
        match classes.classify(&order.status) {
            StatusClass::Delivered => aggregate.delivered_count += 1,
            StatusClass::Rejected => aggregate.rejected_count += 1,
            StatusClass::Open => {}
        }
        if classes.counts_revenue(&order.status) {
            aggregate.revenue_total += order.total_amount;
        }

        if aggregate.phone.is_empty() {
            if let Some(phone) = &identity.phone {
                aggregate.phone = phone.clone();
            }
        }
        if name_is_placeholder(aggregate) {
            if let Some(name) = identity.name.as_deref().filter(|n| !n.trim().is_empty()) {
                aggregate.display_name = name.trim().to_string();
            } else if aggregate.display_name.is_empty() {
                aggregate.display_name = aggregate.phone.clone();
            }
        }

        if let Some(at) = order.created_at {
            aggregate.first_order_at = Some(aggregate.first_order_at.map_or(at, |f| f.min(at)));
            aggregate.last_order_at = Some(aggregate.last_order_at.map_or(at, |l| l.max(at)));
        }
        aggregate.orders.push(order.clone());
    }

    groups
}

/// Most recent activity first; groups without timestamps last
pub fn sort_by_recency(aggregates: &mut [CustomerAggregate]) {
    aggregates.sort_by(|a, b| {
        b.last_order_at
            .cmp(&a.last_order_at)
            .then_with(|| a.group_key.cmp(&b.group_key))
    });
}

/// Case-insensitive search over name, phone and group key
pub fn filter_customers<'a>(
    aggregates: &'a [CustomerAggregate],
    query: &str,
) -> Vec<&'a CustomerAggregate> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return aggregates.iter().collect();
    }
    let digits = normalize_phone(&needle);
    aggregates
        .iter()
        .filter(|a| {
            a.display_name.to_lowercase().contains(&needle)
                || a.group_key.to_lowercase().contains(&needle)
                || (!digits.is_empty() && normalize_phone(&a.phone).contains(&digits))
        })
        .collect()
}

/// Profile fields used for enrichment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Apply profile data without clobbering a meaningful name
pub fn apply_profiles(
    aggregates: &mut [CustomerAggregate],
    profiles: &HashMap<String, ProfileInfo>,
) {
    for aggregate in aggregates.iter_mut() {
        let Some(profile) = aggregate
            .customer_id
            .as_ref()
            .and_then(|id| profiles.get(id))
        else {
            continue;
        };
        if let Some(name) = profile.name.as_deref().filter(|n| !n.trim().is_empty()) {
            if name_is_placeholder(aggregate) {
                aggregate.display_name = name.trim().to_string();
            }
        }
        if profile.avatar_url.is_some() {
            aggregate.avatar_url = profile.avatar_url.clone();
        }
    }
}

/// Groups orders by customer and enriches from profiles
#[derive(Clone)]
pub struct CustomerIndexBuilder {
    backend: Arc<dyn Backend>,
    profiles: LookupSpec,
    classes: StatusClasses,
}

impl CustomerIndexBuilder {
    pub fn new(backend: Arc<dyn Backend>, profiles: LookupSpec, classes: StatusClasses) -> Self {
        Self {
            backend,
            profiles,
            classes,
        }
    }

    pub async fn build_index(&self, orders: &[OrderRecord]) -> Vec<CustomerAggregate> {
        let mut aggregates = group_orders(orders, &self.classes);

        let customer_ids: Vec<String> = aggregates
            .iter()
            .filter_map(|a| a.customer_id.clone())
            .collect();
        let profiles = self.lookup_profiles(&customer_ids).await;
        apply_profiles(&mut aggregates, &profiles);

        sort_by_recency(&mut aggregates);
        aggregates
    }

    /// Batched profile fetch; empty map on failure
    async fn lookup_profiles(&self, customer_ids: &[String]) -> HashMap<String, ProfileInfo> {
        if customer_ids.is_empty() {
            return HashMap::new();
        }
        let ids: Vec<Value> = customer_ids.iter().cloned().map(Value::String).collect();

        for table in &self.profiles.tables {
            match self
                .backend
                .select_by_ids(table, &self.profiles.id_column, &ids)
                .await
            {
                Ok(rows) => {
                    debug!(table = %table, found = rows.len(), "Loaded customer profiles");
                    return rows
                        .iter()
                        .filter_map(|row| {
                            let view = RowView::new(row);
                            let id = view.column_key(&self.profiles.id_column)?;
                            Some((
                                id,
                                ProfileInfo {
                                    name: view.text(Field::ProfileName),
                                    avatar_url: view.text(Field::AvatarUrl),
                                },
                            ))
                        })
                        .collect();
                }
                Err(e) => debug!(table = %table, error = %e, "Profile table candidate rejected"),
            }
        }

        warn!(ids = customer_ids.len(), "No profile table answered");
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use order_types::CustomerIdentity;
    use proptest::prelude::*;

    fn order(id: &str, status: &str, total: i64) -> OrderRecord {
        let mut o = OrderRecord::new(id, status);
        o.total_amount = Decimal::from(total);
        o
    }

    fn with_identity(
        mut o: OrderRecord,
        id: Option<&str>,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> OrderRecord {
        o.customer_identity = CustomerIdentity {
            customer_id: id.map(String::from),
            name: name.map(String::from),
            phone: phone.map(String::from),
        };
        o
    }

    #[test]
    fn test_rejected_orders_count_but_add_no_revenue() {
        let orders: Vec<OrderRecord> = [
            ("a", "delivered", 100),
            ("b", "pending", 200),
            ("c", "rejected", 150),
        ]
        .iter()
        .map(|(id, status, total)| {
            with_identity(order(id, status, *total), Some("cust-1"), None, None)
        })
        .collect();

        let groups = group_orders(&orders, &StatusClasses::default());
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.revenue_total, Decimal::from(300));
        assert_eq!(g.orders_count, 3);
        assert_eq!(g.rejected_count, 1);
        assert_eq!(g.delivered_count, 1);
    }

    #[test]
    fn test_shared_phone_groups_without_customer_id() {
        let orders = vec![
            with_identity(order("a", "pending", 1), None, None, Some("9990001111")),
            with_identity(order("b", "pending", 1), None, Some("Asha"), Some("999-000-1111")),
        ];

        let groups = group_orders(&orders, &StatusClasses::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].orders_count, 2);
        assert_eq!(groups[0].group_key, "phone:9990001111");
        // name replaced the phone placeholder once one showed up
        assert_eq!(groups[0].display_name, "Asha");
    }

    #[test]
    fn test_group_key_precedence() {
        let o = with_identity(order("a", "x", 0), Some("u1"), Some("Bo"), Some("123"));
        assert_eq!(group_key(&o), "id:u1");
        let o = with_identity(order("a", "x", 0), None, Some("Bo"), Some("123"));
        assert_eq!(group_key(&o), "phone:123");
        let o = with_identity(order("a", "x", 0), None, Some(" Bo "), None);
        assert_eq!(group_key(&o), "name:bo");
        let anon_a = group_key(&order("a", "x", 0));
        let anon_b = group_key(&order("b", "x", 0));
        assert!(anon_a.starts_with("anon:"));
        assert_ne!(anon_a, anon_b);
        assert_eq!(anon_a, group_key(&order("a", "y", 5)));
    }

    #[test]
    fn test_profiles_only_replace_placeholder_names() {
        let orders = vec![
            with_identity(order("a", "pending", 1), Some("u1"), None, Some("555")),
            with_identity(order("b", "pending", 1), Some("u2"), Some("Real Name"), Some("777")),
        ];
        let mut groups = group_orders(&orders, &StatusClasses::default());
        assert_eq!(groups[0].display_name, "555");

        let mut profiles = HashMap::new();
        profiles.insert(
            "u1".to_string(),
            ProfileInfo {
                name: Some("Profile One".into()),
                avatar_url: Some("https://cdn/u1.png".into()),
            },
        );
        profiles.insert(
            "u2".to_string(),
            ProfileInfo {
                name: Some("Profile Two".into()),
                avatar_url: None,
            },
        );
        apply_profiles(&mut groups, &profiles);

        assert_eq!(groups[0].display_name, "Profile One");
        assert_eq!(groups[0].avatar_url.as_deref(), Some("https://cdn/u1.png"));
        assert_eq!(groups[1].display_name, "Real Name");
    }

    #[test]
    fn test_timestamps_and_recency_sort() {
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let mut a1 = with_identity(order("a1", "pending", 1), Some("a"), None, None);
        a1.created_at = Some(t(5));
        let mut a2 = with_identity(order("a2", "pending", 1), Some("a"), None, None);
        a2.created_at = Some(t(2));
        let mut b1 = with_identity(order("b1", "pending", 1), Some("b"), None, None);
        b1.created_at = Some(t(9));
        let c1 = with_identity(order("c1", "pending", 1), Some("c"), None, None);

        let mut groups = group_orders(&[a1, a2, b1, c1], &StatusClasses::default());
        sort_by_recency(&mut groups);

        let keys: Vec<&str> = groups.iter().map(|g| g.group_key.as_str()).collect();
        assert_eq!(keys, vec!["id:b", "id:a", "id:c"]);
        assert_eq!(groups[1].first_order_at, Some(t(2)));
        assert_eq!(groups[1].last_order_at, Some(t(5)));
    }

    #[test]
    fn test_filter_customers() {
        let orders = vec![
            with_identity(order("a", "pending", 1), None, Some("Asha Rao"), Some("9990001111")),
            with_identity(order("b", "pending", 1), None, Some("Ben"), Some("12345")),
        ];
        let groups = group_orders(&orders, &StatusClasses::default());

        assert_eq!(filter_customers(&groups, "asha").len(), 1);
        assert_eq!(filter_customers(&groups, "999-000").len(), 1);
        assert_eq!(filter_customers(&groups, "").len(), 2);
    }

    proptest! {
        #[test]
        fn prop_every_order_lands_in_exactly_one_group(
            specs in prop::collection::vec(
                (prop::option::of(0u8..4), prop::option::of(0u8..4), prop::option::of(0u8..4)),
                0..40,
            )
        ) {
            let orders: Vec<OrderRecord> = specs
                .iter()
                .enumerate()
                .map(|(i, (id, name, phone))| {
                    let mut o = order(&format!("o{}", i), "pending", 1);
                    o.customer_identity = CustomerIdentity {
                        customer_id: id.map(|v| format!("c{}", v)),
                        name: name.map(|v| format!("n{}", v)),
                        phone: phone.map(|v| format!("55{}", v)),
                    };
                    o
                })
                .collect();

            let groups = group_orders(&orders, &StatusClasses::default());
            let total: u32 = groups.iter().map(|g| g.orders_count).sum();
            prop_assert_eq!(total as usize, orders.len());

            let mut seen: Vec<&str> = groups
                .iter()
                .flat_map(|g| g.orders.iter().map(|o| o.id.as_str()))
                .collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), orders.len());
        }
    }
}
