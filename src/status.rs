//! Order status vocabularies
//!
//! Backends spell statuses freely ("Delivered", "canceled", "picked-up").
//! Statuses are normalised and sorted into the classes the aggregates count.

use serde::{Deserialize, Serialize};

/// Bucket an order status falls into for counting purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Delivered,
    Rejected,
    Open,
}

/// Configurable status vocabularies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusClasses {
    #[serde(default = "default_delivered")]
    pub delivered: Vec<String>,
    #[serde(default = "default_rejected")]
    pub rejected: Vec<String>,
}

fn default_delivered() -> Vec<String> {
    ["delivered", "completed", "complete", "fulfilled", "done", "picked_up"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_rejected() -> Vec<String> {
    ["cancelled", "canceled", "rejected", "declined", "refunded", "failed"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for StatusClasses {
    fn default() -> Self {
        Self {
            delivered: default_delivered(),
            rejected: default_rejected(),
        }
    }
}

/// Lowercase, trim, and fold `-`/space into `_`
pub fn normalize_status(status: &str) -> String {
    status
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

impl StatusClasses {
    pub fn classify(&self, status: &str) -> StatusClass {
        let status = normalize_status(status);
        if self.rejected.iter().any(|s| normalize_status(s) == status) {
            StatusClass::Rejected
        } else if self.delivered.iter().any(|s| normalize_status(s) == status) {
            StatusClass::Delivered
        } else {
            StatusClass::Open
        }
    }

    /// Cancelled/rejected orders never contribute revenue
    pub fn counts_revenue(&self, status: &str) -> bool {
        self.classify(status) != StatusClass::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_normalises_spelling() {
        let classes = StatusClasses::default();
        assert_eq!(classes.classify("Delivered"), StatusClass::Delivered);
        assert_eq!(classes.classify(" picked-up "), StatusClass::Delivered);
        assert_eq!(classes.classify("CANCELED"), StatusClass::Rejected);
        assert_eq!(classes.classify("preparing"), StatusClass::Open);
        assert!(!classes.counts_revenue("rejected"));
        assert!(classes.counts_revenue("pending"));
    }
}
