//! Order Engine - Schema-adaptive order resolution and aggregation
//!
//! The engine reads storefront orders out of a backend whose schema is not
//! known ahead of time. Tables and columns are discovered by probing a
//! prioritized list of naming candidates; the first candidate that answers
//! becomes the binding used for every read and write of that store session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Consumers: dashboard UI, CLI                                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                OrderEngine / StoreSession                       │
//! │     (binding written once, snapshots, change coalescing)        │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────────────┐
//! │ BindingResolver│  │RelationAggregator│  │   MutationRouter     │
//! │ (probe walk)   │  │ orders + items   │  │ primary -> secondary │
//! └────────────────┘  └──────────────────┘  └──────────────────────┘
//!          │                    │                     │
//!          │          ┌──────────────────┐            │
//!          │          │CustomerIndexBuilder           │
//!          │          └──────────────────┘            │
//!          ▼                    ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               Backend (in-memory fixture | Postgres)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use order_engine::{EngineConfig, InMemoryBackend, OrderEngine};
//!
//! let backend = Arc::new(InMemoryBackend::from_fixture_file("fixtures/storefront.json")?);
//! let engine = OrderEngine::new(backend, &EngineConfig::from_env()?);
//!
//! let session = engine.select_store("store-1").await;
//! let snapshot = session.refresh().await;
//! for customer in &snapshot.customers {
//!     println!("{} {}", customer.display_name, customer.revenue_total);
//! }
//! ```

pub mod aggregator;
pub mod backend;
pub mod buckets;
pub mod coalesce;
pub mod config;
pub mod customers;
pub mod error;
pub mod fields;
pub mod mutation;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod status;

// Re-export main types
pub use aggregator::{Aggregation, RelationAggregator};
pub use backend::{Backend, Filter, InMemoryBackend, Row, SelectQuery};
#[cfg(feature = "database")]
pub use backend::{PgBackend, PgBackendConfig};
pub use buckets::revenue_by_day;
pub use coalesce::{ChangeCoalescer, Debouncer};
pub use config::EngineConfig;
pub use customers::{filter_customers, CustomerIndexBuilder};
pub use error::{BackendError, ConfigError, MutationFailure, ProbeFailure};
pub use mutation::{MutationOutcome, MutationRouter};
pub use registry::{Candidate, CandidateRegistry, CandidateSpec, LookupSpec};
pub use resolver::{BindingResolver, Diagnostic, ProbeScope, Resolution, TransientPolicy};
pub use session::{EngineServices, OrderEngine, Snapshot, StoreSession};
pub use status::{StatusClass, StatusClasses};

pub use order_types::{
    CustomerAggregate, CustomerIdentity, DailyBucket, EntityKind, LineItemRecord, OrderRecord,
    ResolvedBinding, Role,
};
