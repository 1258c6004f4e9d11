//! Dicepay service entry point.
//!
//! Wires the config, gateway client, ledger and reconciliation engine
//! together, then serves the payment webhook. `--probe` checks processor
//! connectivity and exits.

use clap::Parser;
use dicepay::config::ConfigLoader;
use dicepay::games::resolver::OutcomeResolver;
use dicepay::gateway::CryptoPayClient;
use dicepay::ledger::{InMemoryLedger, LedgerStore};
use dicepay::reconcile::{BroadcastAuditSink, ReconciliationEngine};
use dicepay::server::{serve, AppState};
use dicepay::transactions::TransactionLedger;
use dicepay::withdraw::WithdrawalService;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dicepay", about = "Payment reconciliation service for the dice bot")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Probe payment processor connectivity and exit
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let gateway = Arc::new(CryptoPayClient::new(&config.gateway)?);

    if args.probe {
        let app = gateway.get_app_info().await?;
        info!("connected to payment processor as app {} ({})", app.app_id, app.name);
        println!("ok: {}", app.name);
        return Ok(());
    }

    let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
    let transactions = Arc::new(TransactionLedger::new());

    let audit = Arc::new(BroadcastAuditSink::new(256));
    let mut audit_events = audit.subscribe();
    let results_channel_id = config.audit.results_channel_id;
    // Stand-in subscriber until the chat transport attaches: renders every
    // audit record into the service log.
    tokio::spawn(async move {
        while let Ok(event) = audit_events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("results channel {}: {}", results_channel_id, json),
                Err(err) => warn!("failed to encode audit event: {}", err),
            }
        }
    });

    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&ledger),
        Arc::new(OutcomeResolver::with_thread_rng()),
        audit,
    ));
    let withdrawals = Arc::new(WithdrawalService::new(
        Arc::clone(&ledger),
        gateway,
        Arc::clone(&transactions),
        config.withdrawal.clone(),
    ));

    serve(&config.server, AppState { engine, withdrawals }).await?;
    Ok(())
}
