//! Daily revenue buckets for the dashboard chart

use std::collections::BTreeMap;

use chrono::NaiveDate;
use order_types::{DailyBucket, OrderRecord};
use rust_decimal::Decimal;

use crate::status::StatusClasses;

/// One bucket per UTC day with at least one order, oldest first.
///
/// Orders without a timestamp are left out; cancelled orders count but add
/// no revenue.
pub fn revenue_by_day(orders: &[OrderRecord], classes: &StatusClasses) -> Vec<DailyBucket> {
    let mut days: BTreeMap<NaiveDate, DailyBucket> = BTreeMap::new();

    for order in orders {
        let Some(created_at) = order.created_at else {
            continue;
        };
        let day = created_at.date_naive();
        let bucket = days.entry(day).or_insert_with(|| DailyBucket {
            day,
            orders_count: 0,
            revenue_total: Decimal::ZERO,
        });
        bucket.orders_count += 1;
        if classes.counts_revenue(&order.status) {
            bucket.revenue_total += order.total_amount;
        }
    }

    days.into_values().collect()
}
