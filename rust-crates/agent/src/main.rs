use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ledger::IdempotencyLedger;
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use url::Url;
use wager_agent::{
    app::{
        Agent,
        Exit,
    },
    bridge::{
        self,
        READY_TIMEOUT,
    },
    config::Config,
    gate::{
        GatePolicy,
        PaymentGate,
    },
    handler::Desk,
    oracle::{
        AggregatorPriceProvider,
        DEFAULT_PRIMARY_URL,
        DEFAULT_SECONDARY_URL,
        PriceOracle,
        SpotPriceProvider,
    },
    outbox::Outbox,
    persistence::{
        PersistenceManager,
        StateStore,
    },
    router::Router,
    ticket::TicketRegistry,
    wallet::{
        HttpWallet,
        RetryingWallet,
        SimulatedWallet,
        Wallet,
    },
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration document.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Overrides `state_dir` from the configuration.
    #[arg(long)]
    state_dir: Option<String>,

    /// Write daily-rotated log files here instead of stderr.
    #[arg(long)]
    log_dir: Option<String>,
}

fn expand(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| eyre!("cannot expand '{raw}': {e}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// stdout carries the relay protocol, so logs never go there.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "wager-agent.log"));
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

async fn handle_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received interrupt, exiting"),
        Err(err) => tracing::warn!(error = %err, "Interrupt handler failed, exiting anyway"),
    }
}

fn oracle_url(configured: Option<&Url>, default: &str) -> Result<Url> {
    match configured {
        Some(url) => Ok(url.clone()),
        None => Url::parse(default).wrap_err_with(|| format!("parsing {default}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let log_dir = args.log_dir.as_deref().map(expand).transpose()?;
    let _log_guard = init_tracing(log_dir.as_deref());

    let config_path = expand(&args.config)?;
    let mut config = Config::load(&config_path)
        .wrap_err_with(|| format!("loading {}", config_path.display()))?;
    if let Some(dir) = args.state_dir.as_deref() {
        config.state_dir = Some(expand(dir)?);
    }
    tracing::info!(
        network = %config.crypto_network,
        simulation = config.simulation_mode,
        live_transfers = config.live_transfers,
        "configuration loaded"
    );
    if !config.live_transfers && !config.simulation_mode {
        tracing::warn!("live transfers disabled; payments will be dry runs");
    }

    match config.wallet.rpc_url.clone() {
        Some(url) => {
            let token = config
                .wallet
                .auth_token_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            let wallet = HttpWallet::new(
                config.crypto_network,
                url.as_str(),
                token,
                Duration::from_secs(config.wallet.timeout_secs),
            )?;
            run(config, RetryingWallet::new(wallet)).await
        }
        None => {
            tracing::warn!("no wallet rpc_url configured; using the simulated wallet");
            let wallet =
                SimulatedWallet::new(config.crypto_network, config.wallet.simulated_balance);
            run(config, wallet).await
        }
    }
}

async fn run<W: Wallet>(config: Config, wallet: W) -> Result<()> {
    let state_dir = config.state_dir();
    let store = StateStore::in_dir(&state_dir);
    let mut registry = TicketRegistry::new(
        chrono::Duration::milliseconds(config.pending_wager_ttl_ms as i64),
        chrono::Duration::milliseconds(config.bet_cooldown_ms as i64),
    );
    if let Some(snapshot) = store.load()? {
        tracing::info!(
            tickets = snapshot.registry.tickets.len(),
            saved_at = %snapshot.saved_at,
            "restoring saved state"
        );
        registry.restore(snapshot.registry);
    }

    let ledger = IdempotencyLedger::in_dir(&state_dir).map_err(|e| eyre!("{e:#}"))?;
    let reconciliation = ledger.reconcile();
    tracing::info!(
        pending = reconciliation.pending.len(),
        broadcast = reconciliation.broadcast.len(),
        "payment ledger reconciled"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .wrap_err("building price http client")?;
    let oracle = PriceOracle::new(
        SpotPriceProvider::new(
            oracle_url(config.oracle.primary_url.as_ref(), DEFAULT_PRIMARY_URL)?,
            http.clone(),
        ),
        AggregatorPriceProvider::new(
            oracle_url(config.oracle.secondary_url.as_ref(), DEFAULT_SECONDARY_URL)?,
            http,
        ),
        config.payment_safety.price_safety.clone(),
    );
    let gate = PaymentGate::new(GatePolicy::from_config(&config), wallet, oracle, ledger);

    let (mut events, sink) = bridge::connect(tokio::io::stdin(), tokio::io::stdout());
    let bot_id = events
        .wait_ready(READY_TIMEOUT)
        .await
        .wrap_err("waiting for the chat relay")?;
    tracing::info!(%bot_id, "chat relay ready");

    let payout_poll = Duration::from_secs(config.payout_poll_secs.max(1));
    let gap = Duration::from_millis(config.channel_send_gap_ms);
    let mut desk = Desk::new(config, bot_id, gate);
    desk.registry = registry;
    let agent = Agent::new(
        events,
        Outbox::new(sink, gap),
        Router::new(desk),
        PersistenceManager::start(store),
        payout_poll,
    );

    tracing::info!("Starting wager agent");
    match agent.run(handle_interrupt()).await {
        Exit::Interrupted => tracing::info!("Exiting wager agent"),
        Exit::Disconnected => tracing::info!("Chat relay closed, exiting wager agent"),
    }
    Ok(())
}
