//! Faucet service binary

use clap::Parser;
use drip_common::types::Address;
use drip_common::utils::logging::init_logging;
use drip_faucet::api::router;
use drip_faucet::{FaucetConfig, FaucetService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Drip faucet: one payout per address per cooldown window.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON); `FAUCET_*` variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    server_addr: Option<String>,

    /// Node JSON-RPC endpoint
    #[arg(long)]
    rpc_url: Option<String>,

    /// Hex private key of the faucet account
    #[arg(long, env = "FAUCET_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Claim ledger directory
    #[arg(long)]
    db_path: Option<String>,

    /// Release an address held by an unresolved claim intent, then exit
    #[arg(long, value_name = "ADDRESS")]
    abandon_intent: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, config: &mut FaucetConfig) {
        let overrides = [
            (&self.server_addr, &mut config.server_addr),
            (&self.rpc_url, &mut config.rpc_url),
            (&self.private_key, &mut config.private_key),
            (&self.db_path, &mut config.db_path),
        ];
        for (arg, field) in overrides {
            if let Some(value) = arg {
                *field = value.clone();
            }
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rpc_url = %config.rpc_url,
        db_path = %config.db_path,
        dispense_wei = %config.dispense_amount,
        cooldown_secs = config.address_cooldown_secs,
        "starting drip faucet"
    );

    let service = Arc::new(FaucetService::new(config.clone())?);

    if let Some(raw) = args.abandon_intent.as_deref() {
        return abandon(&service, raw).await;
    }

    // Settle whatever the previous run left behind before taking traffic
    match service.reconcile().await {
        Ok(report) => info!(
            recorded = report.recorded,
            released = report.released,
            unresolved = report.unresolved.len(),
            "startup reconciliation finished"
        ),
        Err(e) => error!("startup reconciliation failed: {}", e),
    }
    spawn_reconciler(service.clone(), config.reconcile_interval());

    let mut app = router(service.clone()).layer(TraceLayer::new_for_http());
    if config.cors_enabled {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let addr: SocketAddr = config.server_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.flush().await?;
    info!("Faucet stopped");
    Ok(())
}

async fn abandon(service: &FaucetService, raw: &str) -> anyhow::Result<()> {
    let address = Address::parse(raw)?;
    if service.abandon_intent(&address).await? {
        info!(%address, "claim intent released");
    } else {
        warn!(%address, "no claim intent recorded");
    }
    service.flush().await?;
    Ok(())
}

fn spawn_reconciler(service: Arc<FaucetService>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; startup already reconciled.
        interval.tick().await;
        loop {
            interval.tick().await;
            match service.reconcile().await {
                Ok(report) if report.recorded + report.released > 0 => info!(
                    recorded = report.recorded,
                    released = report.released,
                    "claim intents reconciled"
                ),
                Ok(_) => {}
                Err(e) => warn!("reconciliation failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
