//! Engine configuration
//!
//! Loaded from YAML. Every field has a default, so an empty document (or no
//! file at all) gives the built-in candidate lists and a 250ms coalescing
//! window.

use std::collections::BTreeMap;
use std::time::Duration;

use order_types::EntityKind;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::registry::{CandidateOverride, CandidateRegistry, LookupSpec};
use crate::resolver::TransientPolicy;
use crate::status::StatusClasses;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "ORDER_ENGINE_CONFIG";

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quiet period before a burst of change signals triggers one refresh
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default)]
    pub transient_policy: TransientPolicy,
    /// Column written by status updates
    #[serde(default = "default_status_column")]
    pub status_column: String,
    #[serde(default)]
    pub status_classes: StatusClasses,
    /// Per-entity replacements for the built-in candidate lists
    #[serde(default)]
    pub candidates: BTreeMap<EntityKind, CandidateOverride>,
    #[serde(default)]
    pub products: Option<LookupSpec>,
    #[serde(default)]
    pub profiles: Option<LookupSpec>,
}

fn default_coalesce_window_ms() -> u64 {
    250
}

fn default_status_column() -> String {
    "status".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
            transient_policy: TransientPolicy::default(),
            status_column: default_status_column(),
            status_classes: StatusClasses::default(),
            candidates: BTreeMap::new(),
            products: None,
            profiles: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// File named by `ORDER_ENGINE_CONFIG`, or defaults when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                info!(path = %path, "Loading engine configuration");
                Self::from_file(&path)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, over) in &self.candidates {
            if over.tables.as_ref().is_some_and(|t| t.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "candidates.{}.tables must not be empty",
                    kind
                )));
            }
            if let Some((role, _)) = over.columns.iter().find(|(_, cols)| cols.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "candidates.{}.columns.{} must not be empty",
                    kind, role
                )));
            }
        }
        for (name, lookup) in [("products", &self.products), ("profiles", &self.profiles)] {
            if lookup.as_ref().is_some_and(|l| l.tables.is_empty()) {
                return Err(ConfigError::Invalid(format!("{}.tables must not be empty", name)));
            }
        }
        if self.status_column.trim().is_empty() {
            return Err(ConfigError::Invalid("status_column must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    /// Built-in registry with this config's overrides applied
    pub fn registry(&self) -> CandidateRegistry {
        let mut registry = CandidateRegistry::default();
        for (kind, over) in &self.candidates {
            registry.spec_mut(*kind).apply_override(over);
        }
        if let Some(products) = &self.products {
            registry.products = products.clone();
        }
        if let Some(profiles) = &self.profiles {
            registry.profiles = profiles.clone();
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_types::Role;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
coalesce_window_ms: 500
transient_policy: surface
status_classes:
  delivered: ["served"]
candidates:
  store_orders:
    tables: ["shop_orders", "orders"]
    columns:
      store_id: ["shop_ref"]
      external_number: ["ticket_no"]
products:
  tables: ["catalog"]
  id_column: "sku"
"#;

        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.coalesce_window(), Duration::from_millis(500));
        assert_eq!(config.transient_policy, TransientPolicy::Surface);
        assert_eq!(config.status_classes.delivered, vec!["served".to_string()]);
        // rejected vocabulary keeps its default
        assert!(config.status_classes.rejected.contains(&"cancelled".to_string()));

        let registry = config.registry();
        let spec = registry.spec(EntityKind::StoreOrders);
        assert_eq!(spec.candidates()[0].to_string(), "shop_orders(shop_ref)");
        assert_eq!(spec.role_columns(Role::ExternalNumber), ["ticket_no".to_string()]);
        assert_eq!(registry.products.id_column, "sku");
        assert_eq!(registry.spec(EntityKind::LineItems).tables.len(), 4);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(EngineConfig::from_yaml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_rejects_empty_candidate_lists() {
        let yaml = r#"
candidates:
  line_items:
    tables: []
"#;
        let err = EngineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("candidates.line_items.tables"));
    }
}
