//! Postgres backend
//!
//! NOTE: All queries are runtime-built with `sqlx::query_scalar()` because the
//! table and column names are only known after probing. Identifiers are always
//! quoted; values are always bound.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use super::{value_to_key, Backend, Filter, Row, SelectQuery};
use crate::error::BackendError;

/// Database configuration
#[derive(Debug, Clone)]
pub struct PgBackendConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PgBackendConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/storefront".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// [`Backend`] over a Postgres pool
#[derive(Clone, Debug)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the given configuration
    pub async fn connect(config: &PgBackendConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout);

        if let Some(idle_timeout) = config.idle_timeout {
            pool_options = pool_options.idle_timeout(idle_timeout);
        }

        let pool = pool_options
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created successfully");
        Ok(Self::new(pool))
    }
}

/// Bound parameter for a runtime query
enum Param {
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`public.orders`)
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn push_filter(sql: &mut String, params: &mut Vec<Param>, filter: &Filter) {
    params.push(match filter {
        Filter::Eq { value, .. } => Param::Text(value_to_key(value).unwrap_or_default()),
        Filter::In { values, .. } => {
            Param::TextArray(values.iter().filter_map(value_to_key).collect())
        }
    });
    let n = params.len();
    match filter {
        Filter::Eq { column, .. } => {
            sql.push_str(&format!("t.{}::text = ${}", quote_ident(column), n))
        }
        Filter::In { column, .. } => {
            sql.push_str(&format!("t.{}::text = ANY(${})", quote_ident(column), n))
        }
    }
}

fn build_select(query: &SelectQuery) -> (String, Vec<Param>) {
    let mut params = Vec::new();
    let projection = if query.columns.is_empty() {
        "to_jsonb(t)".to_string()
    } else {
        let pairs: Vec<String> = query
            .columns
            .iter()
            .map(|c| format!("'{}', t.{}", c.replace('\'', "''"), quote_ident(c)))
            .collect();
        format!("jsonb_build_object({})", pairs.join(", "))
    };

    let mut sql = format!("SELECT {} FROM {} t", projection, quote_table(&query.table));
    for (i, filter) in query.filters.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        push_filter(&mut sql, &mut params, filter);
    }
    if let Some(order_by) = &query.order_by {
        sql.push_str(&format!(
            " ORDER BY t.{} {}",
            quote_ident(&order_by.column),
            if order_by.descending { "DESC" } else { "ASC" }
        ));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    (sql, params)
}

fn build_update(table: &str, patch: &Row, filter: &Filter) -> (String, Vec<Param>) {
    let quoted_table = quote_table(table);
    let columns: Vec<String> = patch.keys().map(|c| quote_ident(c)).collect();
    let picks: Vec<String> = columns.iter().map(|c| format!("p.{}", c)).collect();

    let mut params = vec![Param::Json(Value::Object(patch.clone()))];
    let mut sql = format!(
        "UPDATE {tbl} AS t SET ({cols}) = \
         (SELECT {picks} FROM jsonb_populate_record(NULL::{tbl}, $1) AS p) WHERE ",
        tbl = quoted_table,
        cols = columns.join(", "),
        picks = picks.join(", "),
    );
    push_filter(&mut sql, &mut params, filter);
    (sql, params)
}

fn map_err(error: sqlx::Error) -> BackendError {
    match &error {
        sqlx::Error::Database(db) => BackendError {
            code: db.code().map(|c| c.to_string()),
            message: db.message().to_string(),
        },
        _ => BackendError::new(error.to_string()),
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, BackendError> {
        let (sql, params) = build_select(query);
        let mut q = sqlx::query_scalar::<_, Value>(&sql);
        for param in params {
            q = match param {
                Param::Text(s) => q.bind(s),
                Param::TextArray(v) => q.bind(v),
                Param::Json(j) => q.bind(j),
            };
        }
        let values = q.fetch_all(&self.pool).await.map_err(map_err)?;
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn select_by_ids(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Row>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = SelectQuery::new(table).filter(Filter::is_in(id_column, ids.to_vec()));
        self.select(&query).await
    }

    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, BackendError> {
        if patch.is_empty() {
            return Ok(0);
        }
        let (sql, params) = build_update(table, patch, filter);
        let mut q = sqlx::query(&sql);
        for param in params {
            q = match param {
                Param::Text(s) => q.bind(s),
                Param::TextArray(v) => q.bind(v),
                Param::Json(j) => q.bind(j),
            };
        }
        let result = q.execute(&self.pool).await.map_err(map_err)?;
        Ok(result.rows_affected())
    }
}

/// Mask sensitive information in database URL for logging
fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.len() > 20 {
        format!("{}***{}", &url[..10], &url[url.len() - 10..])
    } else {
        "***".to_string()
    }
}
