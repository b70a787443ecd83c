//! In-memory backend for tests, fixtures and local development
//!
//! Tables hold JSON rows plus an explicit column list so empty tables still
//! have a shape. Missing tables and columns produce the same messages Postgres
//! does, which keeps probe classification honest.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{value_to_key, Backend, Filter, Row, SelectQuery};
use crate::error::BackendError;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn check_column(&self, table: &str, column: &str) -> Result<(), BackendError> {
        if self.columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(BackendError::column_missing(table, column))
        }
    }
}

/// A call observed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeLogEntry {
    pub operation: &'static str,
    pub table: String,
    pub columns: Vec<String>,
}

/// Fixture file layout: `{ "tables": { "<name>": { "columns": [..], "rows": [..] } } }`
#[derive(Debug, Deserialize)]
struct Fixture {
    tables: HashMap<String, FixtureTable>,
}

#[derive(Debug, Deserialize)]
struct FixtureTable {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Row>,
}

/// In-memory implementation of [`Backend`]
#[derive(Default)]
pub struct InMemoryBackend {
    tables: RwLock<HashMap<String, MemoryTable>>,
    failures: RwLock<HashMap<String, BackendError>>,
    log: RwLock<Vec<ProbeLogEntry>>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (for interleaving tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Load tables from a fixture JSON document
    pub fn from_fixture_json(content: &str) -> Result<Self> {
        let fixture: Fixture =
            serde_json::from_str(content).context("Failed to parse fixture JSON")?;

        let mut tables = HashMap::new();
        for (name, table) in fixture.tables {
            let mut columns = table.columns;
            for row in &table.rows {
                for key in row.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            tables.insert(
                name,
                MemoryTable {
                    columns,
                    rows: table.rows,
                },
            );
        }

        Ok(Self {
            tables: RwLock::new(tables),
            ..Self::default()
        })
    }

    /// Load a fixture file from disk
    pub fn from_fixture_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path))?;
        Self::from_fixture_json(&content)
    }

    /// Create (or replace) a table with the given columns and rows
    pub async fn create_table(&self, name: &str, columns: &[&str], rows: Vec<Row>) {
        let table = MemoryTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        self.tables.write().await.insert(name.to_string(), table);
    }

    /// Make every call touching `table` fail with `error`
    pub async fn fail_table(&self, table: &str, error: BackendError) {
        self.failures.write().await.insert(table.to_string(), error);
    }

    pub async fn clear_failure(&self, table: &str) {
        self.failures.write().await.remove(table);
    }

    /// Calls observed so far, oldest first
    pub async fn probe_log(&self) -> Vec<ProbeLogEntry> {
        self.log.read().await.clone()
    }

    pub async fn clear_log(&self) {
        self.log.write().await.clear();
    }

    /// Snapshot of a table's rows
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    async fn enter(
        &self,
        operation: &'static str,
        table: &str,
        columns: Vec<String>,
    ) -> Result<(), BackendError> {
        self.log.write().await.push(ProbeLogEntry {
            operation,
            table: table.to_string(),
            columns,
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.read().await.get(table) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => {
            let wanted = value_to_key(value);
            wanted.is_some() && row.get(column).and_then(value_to_key) == wanted
        }
        Filter::In { column, values } => {
            let Some(actual) = row.get(column).and_then(value_to_key) else {
                return false;
            };
            values
                .iter()
                .filter_map(value_to_key)
                .any(|wanted| wanted == actual)
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, BackendError> {
        self.enter("select", &query.table, query.columns.clone())
            .await?;

        let tables = self.tables.read().await;
        let table = tables
            .get(&query.table)
            .ok_or_else(|| BackendError::relation_missing(&query.table))?;

        for column in &query.columns {
            table.check_column(&query.table, column)?;
        }
        for filter in &query.filters {
            table.check_column(&query.table, filter.column())?;
        }
        if let Some(order_by) = &query.order_by {
            table.check_column(&query.table, &order_by.column)?;
        }

        let mut rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
            .collect();

        if let Some(order_by) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order_by.column), b.get(&order_by.column));
                if order_by.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }

    async fn select_by_ids(
        &self,
        table_name: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Row>, BackendError> {
        self.enter("select_by_ids", table_name, vec![id_column.to_string()])
            .await?;

        let tables = self.tables.read().await;
        let table = tables
            .get(table_name)
            .ok_or_else(|| BackendError::relation_missing(table_name))?;
        table.check_column(table_name, id_column)?;

        let filter = Filter::is_in(id_column, ids.to_vec());
        Ok(table
            .rows
            .iter()
            .filter(|row| matches_filter(row, &filter))
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        table_name: &str,
        patch: &Row,
        filter: &Filter,
    ) -> Result<u64, BackendError> {
        let mut columns: Vec<String> = patch.keys().cloned().collect();
        columns.push(filter.column().to_string());
        self.enter("update", table_name, columns).await?;

        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| BackendError::relation_missing(table_name))?;

        table.check_column(table_name, filter.column())?;
        for column in patch.keys() {
            if !table.columns.contains(column) {
                return Err(BackendError::with_code(
                    "42703",
                    format!("column \"{}\" of relation \"{}\" does not exist", column, table_name),
                ));
            }
        }

        let mut affected = 0;
        for row in table.rows.iter_mut().filter(|row| matches_filter(row, filter)) {
            for (key, value) in patch {
                row.insert(key.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }
}
