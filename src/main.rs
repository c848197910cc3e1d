use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use audit_ledger::anchor::ethereum::{EthereumAnchor, EthereumConfig};
use audit_ledger::anchor::mock::MockAnchor;
use audit_ledger::anchor::{AnchorBackend, AnchorClient};
use audit_ledger::config::{Config, StorageBackendKind};
use audit_ledger::error::{AuditError, Result};
use audit_ledger::server::{self, AppState};
use audit_ledger::storage::ipfs::{IpfsConfig, IpfsStore};
use audit_ledger::storage::ContentStore;
use audit_ledger::store::models::Module;
use audit_ledger::store::repository::{self, EventFilter};
use audit_ledger::store::Database;
use audit_ledger::worker::Worker;
use audit_ledger::{batch, verify};

#[derive(Parser)]
#[command(name = "audit-ledger")]
#[command(about = "Tamper-evident audit trail with blockchain anchoring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the background anchoring worker
    Serve,
    /// Assemble and submit one batch, then exit
    Assemble,
    /// Verify event integrity and exit non-zero on any failure
    Verify {
        /// Verify a single event instead of a range
        #[arg(long)]
        event_id: Option<Uuid>,
        /// Restrict to one producing module
        #[arg(long)]
        module: Option<Module>,
        /// Earliest occurred_at (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        date_from: Option<String>,
        /// Latest occurred_at (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        date_to: Option<String>,
        /// Also compare stored roots against the anchored on-chain roots
        #[arg(long)]
        on_chain: bool,
        /// Write the full report as JSON to this path
        #[arg(long)]
        export: Option<std::path::PathBuf>,
        /// Print every event checked, not only failures
        #[arg(long, short)]
        verbose: bool,
    },
    /// Print event and batch pipeline counts
    Stats,
}

fn build_anchor(config: &Config) -> AnchorClient {
    let backend: Arc<dyn AnchorBackend> = if config.network == "mock" {
        Arc::new(MockAnchor::new())
    } else {
        Arc::new(EthereumAnchor::new(EthereumConfig {
            rpc_url: config.rpc_endpoint.clone(),
            network: config.network.clone(),
            private_key_hex: config.private_key_hex.clone(),
            chain_id: config.chain_id,
        }))
    };
    AnchorClient::new(
        backend,
        config.retry_attempts,
        config.max_confirmation_wait_seconds,
    )
}

fn build_content_store(config: &Config) -> Option<Arc<dyn ContentStore>> {
    match config.storage_backend {
        StorageBackendKind::None => None,
        StorageBackendKind::Ipfs => Some(Arc::new(IpfsStore::new(IpfsConfig {
            api_url: config.ipfs_api_url.clone(),
        }))),
    }
}

/// Accept RFC 3339 timestamps or bare dates on the command line.
fn parse_cli_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date: NaiveDate = raw
        .parse()
        .map_err(|_| AuditError::Serialization(format!("invalid date: {raw}")))?;
    let time = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| DateTime::from_naive_utc_and_offset(t, Utc))
        .ok_or_else(|| AuditError::Serialization(format!("invalid date: {raw}")))
}

async fn run_serve(config: Config) -> Result<()> {
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let anchor = build_anchor(&config);
    let content_store = build_content_store(&config);

    Worker::new(db.pool().clone(), config.clone(), anchor.clone(), content_store)
        .spawn(Duration::from_secs(10));

    let addr = config.listen_addr.clone();
    server::serve(AppState { db, config, anchor }, &addr).await
}

async fn run_assemble(config: Config) -> Result<()> {
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    let anchor = build_anchor(&config);

    match batch::assemble(
        db.pool(),
        config.hash_algorithm,
        config.batch_size,
        config.batch_timeout_seconds,
    )
    .await?
    {
        Some(sealed) => {
            println!("sealed batch {} ({} events)", sealed.id, sealed.leaf_count);
            if let Some(record) = anchor.submit_batch(db.pool(), &sealed).await? {
                println!("submitted to {}: {}", record.network, record.reference);
                anchor.poll_batch(db.pool(), sealed.id).await?;
                println!("confirmed");
            }
        }
        None => println!("nothing to batch"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_verify(
    config: Config,
    event_id: Option<Uuid>,
    module: Option<Module>,
    date_from: Option<String>,
    date_to: Option<String>,
    on_chain: bool,
    export: Option<std::path::PathBuf>,
    verbose: bool,
) -> Result<bool> {
    let db = Database::connect(&config.database_url).await?;
    let anchor = build_anchor(&config);
    let pool = db.pool();

    let report = if let Some(id) = event_id {
        let result =
            verify::verify_event(pool, config.hash_algorithm, &anchor, id, on_chain).await?;
        verify::summarize(vec![result])
    } else {
        let filter = EventFilter {
            module,
            from: date_from.as_deref().map(|d| parse_cli_date(d, false)).transpose()?,
            to: date_to.as_deref().map(|d| parse_cli_date(d, true)).transpose()?,
            ..Default::default()
        };
        verify::integrity_check(pool, config.hash_algorithm, &anchor, &filter, on_chain).await?
    };

    if verbose {
        println!("checked {} events: {} passed, {} failed",
            report.total, report.passed, report.failed);
    }
    for failure in &report.failures {
        eprintln!(
            "FAIL {}: {}",
            failure.event_id,
            serde_json::to_string(&failure.failure)
                .unwrap_or_else(|_| "unknown failure".into())
        );
    }

    if let Some(path) = export {
        std::fs::write(&path, serde_json::to_string_pretty(&report).map_err(
            |e| AuditError::Serialization(e.to_string()),
        )?)?;
        println!("report written to {}", path.display());
    }

    if report.failed == 0 {
        println!("OK: {} events verified", report.total);
    }
    Ok(report.failed == 0)
}

async fn run_stats(config: Config) -> Result<()> {
    let db = Database::connect(&config.database_url).await?;
    let events = repository::event_stats(db.pool()).await?;
    let batches = repository::batch_stats(db.pool()).await?;

    println!("events:  {} total", events.total);
    println!("  pending  {}", events.pending);
    println!("  batched  {}", events.batched);
    println!("  anchored {}", events.anchored);
    println!("  failed   {}", events.failed);
    println!("batches: {} total", batches.total);
    println!("  sealed    {}", batches.sealed);
    println!("  submitted {}", batches.submitted);
    println!("  confirmed {}", batches.confirmed);
    println!("  failed    {}", batches.failed);
    println!("  stuck     {}", batches.stuck);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_ledger=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let outcome = match cli.command {
        Commands::Serve => run_serve(config).await.map(|_| true),
        Commands::Assemble => run_assemble(config).await.map(|_| true),
        Commands::Verify {
            event_id,
            module,
            date_from,
            date_to,
            on_chain,
            export,
            verbose,
        } => {
            run_verify(
                config, event_id, module, date_from, date_to, on_chain, export, verbose,
            )
            .await
        }
        Commands::Stats => run_stats(config).await.map(|_| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        // Integrity failures were already printed per event.
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_cli_date("2026-03-14T09:26:53Z", false).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-14T09:26:53+00:00");
    }

    #[test]
    fn test_parse_bare_date_spans_whole_day() {
        let from = parse_cli_date("2026-03-14", false).unwrap();
        let to = parse_cli_date("2026-03-14", true).unwrap();
        assert!(from < to);
        assert_eq!(from.format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(to.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(parse_cli_date("yesterday", false).is_err());
    }
}
