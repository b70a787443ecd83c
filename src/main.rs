//! Order Engine CLI
//!
//! Runs one engine operation against a fixture file or a live Postgres
//! database and prints the result as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Which tables/columns does store s1 bind to?
//! order-engine --fixture fixtures/storefront.json --store s1 resolve
//!
//! # Customers matching "ana"
//! order-engine --fixture fixtures/storefront.json --store s1 customers --search ana
//!
//! # Mark an order delivered
//! DATABASE_URL=postgresql://localhost/shop order-engine --database --store s1 set-status 1001 delivered
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_engine::{
    filter_customers, revenue_by_day, Backend, EngineConfig, InMemoryBackend, OrderEngine,
};

#[derive(Parser)]
#[command(name = "order-engine")]
#[command(version = "0.1.0")]
#[command(about = "Resolve, aggregate and update storefront orders over an unknown schema")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (YAML); falls back to ORDER_ENGINE_CONFIG
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Read tables from a JSON fixture instead of a database
    #[arg(long, global = true)]
    fixture: Option<String>,

    /// Connect to DATABASE_URL
    #[arg(long, global = true)]
    database: bool,

    /// Store whose orders to work on
    #[arg(long, short, global = true, env = "ORDER_ENGINE_STORE")]
    store: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved orders and line-item bindings
    Resolve,

    /// List orders with their line items, newest first
    Orders,

    /// List customers, most recent first
    Customers {
        /// Case-insensitive match on name or phone
        #[arg(long)]
        search: Option<String>,
    },

    /// Set the status of one order
    SetStatus {
        /// Order id or human order number
        order_id: String,
        status: String,
    },

    /// Orders and revenue per day
    Buckets,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::from_env()?,
    };
    tracing::info!(
        coalesce_window_ms = config.coalesce_window_ms,
        transient_policy = ?config.transient_policy,
        "Configuration loaded"
    );

    let backend = open_backend(&cli).await?;
    let engine = OrderEngine::new(backend, &config);
    let store = cli
        .store
        .as_deref()
        .context("--store (or ORDER_ENGINE_STORE) is required")?;

    match cli.command {
        Commands::Resolve => cmd_resolve(&engine, store).await,
        Commands::Orders => {
            let session = engine.select_store(store).await;
            let snapshot = session.refresh().await;
            report_diagnostic(snapshot.diagnostic.as_deref());
            print_json(&snapshot.orders)
        }
        Commands::Customers { search } => {
            let session = engine.select_store(store).await;
            let snapshot = session.refresh().await;
            report_diagnostic(snapshot.diagnostic.as_deref());
            let customers = filter_customers(&snapshot.customers, search.as_deref().unwrap_or(""));
            print_json(&customers)
        }
        Commands::SetStatus { order_id, status } => {
            let session = engine.select_store(store).await;
            session.refresh().await;
            let outcome = session.set_status(&order_id, &status).await?;
            print_json(&serde_json::json!({
                "order_id": order_id,
                "status": status,
                "matched_column": outcome.column,
                "affected": outcome.affected,
            }))
        }
        Commands::Buckets => {
            let session = engine.select_store(store).await;
            let snapshot = session.refresh().await;
            report_diagnostic(snapshot.diagnostic.as_deref());
            print_json(&revenue_by_day(
                &snapshot.orders,
                &engine.services().status_classes,
            ))
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

async fn cmd_resolve(engine: &OrderEngine, store: &str) -> Result<()> {
    let snapshot = engine.select_store(store).await.refresh().await;
    let Some(orders) = snapshot.orders_binding.as_ref() else {
        bail!(
            "{}",
            snapshot.diagnostic.as_deref().unwrap_or("store orders unresolved")
        );
    };
    report_diagnostic(snapshot.diagnostic.as_deref());

    print_json(&serde_json::json!({
        "store_orders": orders,
        "line_items": snapshot.items_binding,
        "orders": snapshot.orders.len(),
    }))
}

async fn open_backend(cli: &Cli) -> Result<Arc<dyn Backend>> {
    match (&cli.fixture, cli.database) {
        (Some(_), true) => bail!("--fixture and --database are mutually exclusive"),
        (Some(path), false) => Ok(Arc::new(InMemoryBackend::from_fixture_file(path)?)),
        (None, true) => connect_database().await,
        (None, false) => bail!("one of --fixture or --database is required"),
    }
}

#[cfg(feature = "database")]
async fn connect_database() -> Result<Arc<dyn Backend>> {
    let config = order_engine::PgBackendConfig::default();
    let backend = order_engine::PgBackend::connect(&config)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "database"))]
async fn connect_database() -> Result<Arc<dyn Backend>> {
    bail!("built without the `database` feature")
}

fn report_diagnostic(diagnostic: Option<&str>) {
    if let Some(diagnostic) = diagnostic {
        tracing::warn!(%diagnostic, "Partial result");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}
