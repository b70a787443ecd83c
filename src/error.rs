//! Error types for the order engine
//!
//! Backend failures arrive as free-text messages (optionally with a SQLSTATE or
//! PostgREST code). Probing turns them into a [`ProbeFailure`] by message
//! inspection; that textual convention is the only contract the backend gives us.

use thiserror::Error;

/// Error reported by a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    /// SQLSTATE / PostgREST code when the backend supplies one
    pub code: Option<String>,
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Postgres-style "relation does not exist"
    pub fn relation_missing(table: &str) -> Self {
        Self::with_code("42P01", format!("relation \"{}\" does not exist", table))
    }

    /// Postgres-style "column does not exist"
    pub fn column_missing(table: &str, column: &str) -> Self {
        Self::with_code("42703", format!("column {}.{} does not exist", table, column))
    }

    pub fn permission_denied(table: &str) -> Self {
        Self::with_code("42501", format!("permission denied for table {}", table))
    }
}

/// Why a single probe failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The table does not exist or is not visible
    #[error("entity missing: {0}")]
    EntityMissing(String),

    /// The table exists but a referenced column does not
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Permission, network or unclassified failure
    #[error("transient or permission failure: {0}")]
    TransientOrPermission(String),
}

const ENTITY_MISSING_CODES: &[&str] = &["42P01", "PGRST205", "PGRST106"];
const SHAPE_MISMATCH_CODES: &[&str] = &["42703", "PGRST204", "PGRST100"];

impl ProbeFailure {
    /// Classify a backend error.
    ///
    /// Column checks run first: Postgres reports missing columns in UPDATE as
    /// `column "x" of relation "y" does not exist`, which would otherwise read
    /// as a missing relation.
    pub fn classify(error: &BackendError) -> Self {
        let message = error.message.clone();

        if let Some(code) = error.code.as_deref() {
            if SHAPE_MISMATCH_CODES.contains(&code) {
                return ProbeFailure::ShapeMismatch(message);
            }
            if ENTITY_MISSING_CODES.contains(&code) {
                return ProbeFailure::EntityMissing(message);
            }
        }

        let lower = message.to_lowercase();
        if is_column_message(&lower) {
            ProbeFailure::ShapeMismatch(message)
        } else if is_relation_message(&lower) {
            ProbeFailure::EntityMissing(message)
        } else {
            ProbeFailure::TransientOrPermission(message)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::EntityMissing(_) => "entity_missing",
            ProbeFailure::ShapeMismatch(_) => "shape_mismatch",
            ProbeFailure::TransientOrPermission(_) => "transient_or_permission",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProbeFailure::EntityMissing(m)
            | ProbeFailure::ShapeMismatch(m)
            | ProbeFailure::TransientOrPermission(m) => m,
        }
    }
}

fn is_column_message(lower: &str) -> bool {
    lower.contains("no such column")
        || (lower.contains("column")
            && (lower.contains("does not exist")
                || lower.contains("could not find")
                || lower.contains("not found")))
}

fn is_relation_message(lower: &str) -> bool {
    lower.contains("no such table")
        || lower.contains("could not find the table")
        || ((lower.contains("relation") || lower.contains("table"))
            && (lower.contains("does not exist") || lower.contains("not found")))
}

/// A status update that failed on both identifier columns
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to set status of order {order_id} in {table}: {message}")]
pub struct MutationFailure {
    pub table: String,
    pub order_id: String,
    /// Last error observed, or a "no rows matched" note
    pub message: String,
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
