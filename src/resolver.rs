//! Binding resolver
//!
//! Walks the candidate list for a logical entity, probing each (table,
//! columns) combination with a one-row filtered read, and keeps the first one
//! the backend accepts.
//!
//! The walk itself is a small synchronous state machine ([`ProbeWalk`]) so the
//! enumeration order and the skip rules can be tested without a backend; the
//! async [`BindingResolver`] only feeds it probe outcomes.
//!
//! | Probe outcome            | Next step                                   |
//! |--------------------------|---------------------------------------------|
//! | success                  | return the binding                          |
//! | `EntityMissing`          | skip every remaining candidate of the table |
//! | `ShapeMismatch`          | next candidate                              |
//! | `TransientOrPermission`  | next candidate (or stop, per policy)        |

use std::sync::Arc;

use order_types::{EntityKind, ResolvedBinding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{value_to_key, Backend, Filter, SelectQuery};
use crate::error::ProbeFailure;
use crate::registry::{Candidate, CandidateRegistry};

/// How a transient/permission probe failure is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientPolicy {
    /// Move on to the next candidate, like a shape mismatch
    #[default]
    Advance,
    /// Stop probing and report the entity as unresolved
    Surface,
}

/// What the walk does after a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    NextCandidate,
    SkipTable,
    Stop,
}

impl ProbeFailure {
    pub fn advance(&self, policy: TransientPolicy) -> Advance {
        match (self, policy) {
            (ProbeFailure::EntityMissing(_), _) => Advance::SkipTable,
            (ProbeFailure::ShapeMismatch(_), _) => Advance::NextCandidate,
            (ProbeFailure::TransientOrPermission(_), TransientPolicy::Advance) => {
                Advance::NextCandidate
            }
            (ProbeFailure::TransientOrPermission(_), TransientPolicy::Surface) => Advance::Stop,
        }
    }
}

/// One failed probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub candidate: String,
    pub failure: ProbeFailure,
}

/// Operator-facing account of a failed resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub entity_kind: EntityKind,
    pub context_id: String,
    pub attempts: Vec<ProbeAttempt>,
    /// Candidates never probed because their table was missing or probing stopped
    pub skipped: usize,
}

impl Diagnostic {
    /// Attempts that failed for reasons other than schema shape
    pub fn transient_failures(&self) -> impl Iterator<Item = &ProbeAttempt> {
        self.attempts
            .iter()
            .filter(|a| matches!(a.failure, ProbeFailure::TransientOrPermission(_)))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no {} binding for context {}; tried",
            self.entity_kind, self.context_id
        )?;
        if self.attempts.is_empty() {
            write!(f, " nothing")?;
        }
        for (i, attempt) in self.attempts.iter().enumerate() {
            write!(
                f,
                "{} {} [{}]",
                if i == 0 { "" } else { ";" },
                attempt.candidate,
                attempt.failure.kind()
            )?;
        }
        if self.skipped > 0 {
            write!(f, "; {} skipped", self.skipped)?;
        }
        let transient: Vec<&str> = self
            .transient_failures()
            .map(|a| a.failure.message())
            .collect();
        if !transient.is_empty() {
            write!(f, "; non-schema errors: {}", transient.join(" | "))?;
        }
        Ok(())
    }
}

/// Result of resolving one entity for one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedBinding),
    Unresolved(Diagnostic),
}

impl Resolution {
    pub fn binding(&self) -> Option<&ResolvedBinding> {
        match self {
            Resolution::Resolved(binding) => Some(binding),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn into_binding(self) -> Option<ResolvedBinding> {
        match self {
            Resolution::Resolved(binding) => Some(binding),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Restriction applied to every probe so it stays cheap and tenant-scoped
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeScope {
    /// `first_role_column = id`
    Equals(Value),
    /// `first_role_column IN ids`
    AnyOf(Vec<Value>),
}

impl ProbeScope {
    fn filter(&self, column: &str) -> Filter {
        match self {
            ProbeScope::Equals(value) => Filter::eq(column, value.clone()),
            ProbeScope::AnyOf(values) => Filter::is_in(column, values.clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            ProbeScope::Equals(value) => value_to_key(value).unwrap_or_else(|| value.to_string()),
            ProbeScope::AnyOf(values) => format!("{} ids", values.len()),
        }
    }
}

/// Ordered walk over candidates with the skip rules applied
#[derive(Debug)]
pub struct ProbeWalk {
    candidates: Vec<Candidate>,
    cursor: usize,
    skip_table: Option<String>,
    stopped: bool,
    skipped: usize,
    attempts: Vec<ProbeAttempt>,
    policy: TransientPolicy,
}

impl ProbeWalk {
    pub fn new(candidates: Vec<Candidate>, policy: TransientPolicy) -> Self {
        Self {
            candidates,
            cursor: 0,
            skip_table: None,
            stopped: false,
            skipped: 0,
            attempts: Vec::new(),
            policy,
        }
    }

    /// Next candidate to probe, or `None` when the walk is exhausted
    pub fn next_candidate(&mut self) -> Option<Candidate> {
        if self.stopped {
            return None;
        }
        while let Some(candidate) = self.candidates.get(self.cursor) {
            self.cursor += 1;
            if self.skip_table.as_deref() == Some(candidate.table.as_str()) {
                self.skipped += 1;
                continue;
            }
            return Some(candidate.clone());
        }
        None
    }

    pub fn record_failure(&mut self, candidate: &Candidate, failure: ProbeFailure) {
        match failure.advance(self.policy) {
            Advance::NextCandidate => {}
            Advance::SkipTable => self.skip_table = Some(candidate.table.clone()),
            Advance::Stop => {
                self.stopped = true;
                self.skipped += self.candidates.len() - self.cursor;
            }
        }
        self.attempts.push(ProbeAttempt {
            candidate: candidate.to_string(),
            failure,
        });
    }

    pub fn into_diagnostic(self, entity_kind: EntityKind, context_id: String) -> Diagnostic {
        Diagnostic {
            entity_kind,
            context_id,
            attempts: self.attempts,
            skipped: self.skipped,
        }
    }
}

/// Probes candidates against a live backend
#[derive(Clone)]
pub struct BindingResolver {
    backend: Arc<dyn Backend>,
    registry: Arc<CandidateRegistry>,
    policy: TransientPolicy,
}

impl BindingResolver {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<CandidateRegistry>,
        policy: TransientPolicy,
    ) -> Self {
        Self {
            backend,
            registry,
            policy,
        }
    }

    pub fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    /// Resolve `kind` for a context id.
    ///
    /// Probes filter the entity's first role column (store id for orders, order
    /// id for line items) by `context_id`.
    pub async fn resolve(&self, kind: EntityKind, context_id: &str) -> Resolution {
        self.resolve_scoped(kind, &ProbeScope::Equals(Value::String(context_id.to_string())))
            .await
    }

    /// Resolve `kind` with an explicit probe scope
    pub async fn resolve_scoped(&self, kind: EntityKind, scope: &ProbeScope) -> Resolution {
        let spec = self.registry.spec(kind);
        let mut walk = ProbeWalk::new(spec.candidates(), self.policy);

        while let Some(candidate) = walk.next_candidate() {
            match self.probe(&candidate, scope).await {
                Ok(()) => {
                    let binding = ResolvedBinding {
                        entity_kind: kind,
                        table_name: candidate.table.clone(),
                        columns_by_role: candidate.columns_by_role(),
                    };
                    info!(entity = %kind, binding = %binding, "Resolved binding");
                    return Resolution::Resolved(binding);
                }
                Err(failure) => {
                    match &failure {
                        ProbeFailure::TransientOrPermission(message) => warn!(
                            entity = %kind,
                            candidate = %candidate,
                            error = %message,
                            "Probe failed for a non-schema reason"
                        ),
                        _ => debug!(
                            entity = %kind,
                            candidate = %candidate,
                            outcome = failure.kind(),
                            "Probe rejected candidate"
                        ),
                    }
                    walk.record_failure(&candidate, failure);
                }
            }
        }

        let diagnostic = walk.into_diagnostic(kind, scope.describe());
        warn!(entity = %kind, diagnostic = %diagnostic, "Binding unresolved");
        Resolution::Unresolved(diagnostic)
    }

    async fn probe(&self, candidate: &Candidate, scope: &ProbeScope) -> Result<(), ProbeFailure> {
        let Some((_, scope_column)) = candidate.columns.first() else {
            return Err(ProbeFailure::ShapeMismatch(format!(
                "candidate {} has no probe columns",
                candidate
            )));
        };

        let query = SelectQuery::new(candidate.table.clone())
            .columns(candidate.column_names())
            .filter(scope.filter(scope_column))
            .limit(1);

        self.backend
            .select(&query)
            .await
            .map(|_| ())
            .map_err(|e| ProbeFailure::classify(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CandidateSpec;

    fn cand(table: &str, column: &str) -> Candidate {
        Candidate {
            table: table.to_string(),
            columns: vec![(order_types::Role::StoreId, column.to_string())],
        }
    }

    #[test]
    fn test_advance_rules() {
        let missing = ProbeFailure::EntityMissing(String::new());
        let shape = ProbeFailure::ShapeMismatch(String::new());
        let transient = ProbeFailure::TransientOrPermission(String::new());

        assert_eq!(missing.advance(TransientPolicy::Advance), Advance::SkipTable);
        assert_eq!(shape.advance(TransientPolicy::Surface), Advance::NextCandidate);
        assert_eq!(transient.advance(TransientPolicy::Advance), Advance::NextCandidate);
        assert_eq!(transient.advance(TransientPolicy::Surface), Advance::Stop);
    }

    #[test]
    fn test_walk_skips_rest_of_missing_table() {
        let mut walk = ProbeWalk::new(
            vec![cand("a", "x"), cand("a", "y"), cand("a", "z"), cand("b", "x")],
            TransientPolicy::Advance,
        );

        let first = walk.next_candidate().unwrap();
        walk.record_failure(&first, ProbeFailure::EntityMissing("gone".into()));

        let next = walk.next_candidate().unwrap();
        assert_eq!(next.to_string(), "b(x)");
        assert!(walk.next_candidate().is_none());

        let diagnostic = walk.into_diagnostic(EntityKind::StoreOrders, "s1".into());
        assert_eq!(diagnostic.skipped, 2);
        assert_eq!(diagnostic.attempts.len(), 1);
    }

    #[test]
    fn test_walk_shape_mismatch_stays_in_table() {
        let mut walk = ProbeWalk::new(
            vec![cand("a", "x"), cand("a", "y"), cand("b", "x")],
            TransientPolicy::Advance,
        );

        let first = walk.next_candidate().unwrap();
        walk.record_failure(&first, ProbeFailure::ShapeMismatch("no x".into()));
        assert_eq!(walk.next_candidate().unwrap().to_string(), "a(y)");
    }

    #[test]
    fn test_walk_surface_policy_stops() {
        let mut walk = ProbeWalk::new(
            vec![cand("a", "x"), cand("a", "y"), cand("b", "x")],
            TransientPolicy::Surface,
        );

        let first = walk.next_candidate().unwrap();
        walk.record_failure(
            &first,
            ProbeFailure::TransientOrPermission("permission denied for table a".into()),
        );
        assert!(walk.next_candidate().is_none());

        let diagnostic = walk.into_diagnostic(EntityKind::StoreOrders, "s1".into());
        assert_eq!(diagnostic.skipped, 2);
        assert!(diagnostic
            .to_string()
            .contains("non-schema errors: permission denied for table a"));
    }

    #[test]
    fn test_walk_covers_full_spec_enumeration() {
        let spec = CandidateSpec::store_orders();
        let total = spec.candidates().len();
        let mut walk = ProbeWalk::new(spec.candidates(), TransientPolicy::Advance);

        let mut seen = 0;
        while let Some(candidate) = walk.next_candidate() {
            seen += 1;
            walk.record_failure(&candidate, ProbeFailure::ShapeMismatch(String::new()));
        }
        assert_eq!(seen, total);
    }
}
