//! Backend query surface
//!
//! The engine only ever needs three operations from a backend: a filtered
//! read, a batched read by ids, and an update. Everything else (joins,
//! transactions, arbitrary predicates) is deliberately absent.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::BackendError;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::{InMemoryBackend, ProbeLogEntry};
#[cfg(feature = "database")]
pub use postgres::{PgBackend, PgBackendConfig};

/// One row as returned by a backend
pub type Row = Map<String, Value>;

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: Value },
    /// `column IN (values)`
    In { column: String, values: Vec<Value> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => column,
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A filtered read
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    /// Columns to return; empty means all columns
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Query surface consumed by the engine
///
/// Implementations must be Send + Sync; one backend is shared by every
/// store session.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Filtered read
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, BackendError>;

    /// Batched read by id; ids with no row are silently omitted
    async fn select_by_ids(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Row>, BackendError>;

    /// Apply `patch` to rows matching `filter`, returning the affected row count
    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, BackendError>;
}

/// Render a scalar JSON value as an id string (`"7"` for `7`, `"abc"` for `"abc"`)
pub fn value_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
