//! Logical field synonyms and the typed row accessor
//!
//! Operator backends disagree on what to call the same thing (`total`,
//! `total_amount`, `grand_total`, ...). Each logical [`Field`] declares its
//! synonyms once, in priority order, and [`RowView`] is the single place that
//! walks them.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::backend::{value_to_key, Row};

/// A logical field read from loosely-shaped rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    OrderId,
    ExternalNumber,
    Status,
    CreatedAt,
    Total,
    CustomerId,
    CustomerName,
    CustomerPhone,
    LineItemId,
    ItemName,
    Quantity,
    ProductName,
    ProfileName,
    AvatarUrl,
}

impl Field {
    /// Column names tried for this field, highest priority first
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Field::OrderId => &["id", "order_id", "uuid"],
            Field::ExternalNumber => &[
                "order_number",
                "order_no",
                "number",
                "display_id",
                "short_id",
            ],
            Field::Status => &["status", "order_status", "state"],
            Field::CreatedAt => &[
                "created_at",
                "inserted_at",
                "placed_at",
                "order_date",
                "createdAt",
            ],
            Field::Total => &["total_amount", "total", "grand_total", "total_price", "amount"],
            Field::CustomerId => &["customer_id", "user_id", "buyer_id", "profile_id"],
            Field::CustomerName => &["customer_name", "full_name", "name", "contact_name"],
            Field::CustomerPhone => &[
                "customer_phone",
                "phone",
                "phone_number",
                "mobile",
                "contact_phone",
            ],
            Field::LineItemId => &["id", "order_item_id", "line_id"],
            Field::ItemName => &["name", "item_name", "product_name", "title"],
            Field::Quantity => &["quantity", "qty", "count"],
            Field::ProductName => &["name", "title", "product_name"],
            Field::ProfileName => &["full_name", "display_name", "name", "username"],
            Field::AvatarUrl => &["avatar_url", "avatar", "photo_url", "image_url"],
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Borrowed, typed view over a backend row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self { row }
    }

    /// First non-blank value among the field's synonyms
    pub fn value(&self, field: Field) -> Option<&'a Value> {
        field
            .synonyms()
            .iter()
            .filter_map(|name| self.row.get(*name))
            .find(|v| !is_blank(v))
    }

    /// Value of one concrete column (e.g. a column discovered by probing)
    pub fn column(&self, column: &str) -> Option<&'a Value> {
        self.row.get(column).filter(|v| !is_blank(v))
    }

    pub fn text(&self, field: Field) -> Option<String> {
        self.value(field).and_then(value_to_text)
    }

    /// Id-like rendering (numbers become their decimal string)
    pub fn key(&self, field: Field) -> Option<String> {
        self.value(field).and_then(value_to_key)
    }

    pub fn column_key(&self, column: &str) -> Option<String> {
        self.column(column).and_then(value_to_key)
    }

    pub fn decimal(&self, field: Field) -> Option<Decimal> {
        self.value(field).and_then(value_to_decimal)
    }

    pub fn column_decimal(&self, column: &str) -> Option<Decimal> {
        self.column(column).and_then(value_to_decimal)
    }

    pub fn timestamp(&self, field: Field) -> Option<DateTime<Utc>> {
        self.value(field).and_then(value_to_timestamp)
    }

    /// Column that [`value`](Self::value) reads `field` from
    pub fn present_column(&self, field: Field) -> Option<&'static str> {
        field
            .synonyms()
            .iter()
            .copied()
            .find(|name| self.row.get(*name).is_some_and(|v| !is_blank(v)))
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
                .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok()))
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

pub(crate) fn value_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Values past year 2286 in seconds are treated as milliseconds
            if raw.abs() >= 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
