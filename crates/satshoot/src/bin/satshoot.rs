use anyhow::Context;
use clap::{Parser, Subcommand};
use nostr::is_hex_key;
use nostr_client::{RelayConfig, RelayPool};
use satshoot::events::{Offer, Projection, Ticket};
use satshoot::{
    ConnectivitySignal, Persistence, RelayGraphSource, Session, SqlitePersistence, StoreUpdate,
    Transport, load_config, save_config,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "satshoot",
    about = "Follow the SatShoot marketplace from the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print tickets and offers as they arrive
    Watch {
        /// Config file (defaults apply when it does not exist)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Relay to use instead of the configured ones (repeatable)
        #[arg(long = "relay")]
        relays: Vec<String>,

        /// Mark authors trusted by this key's web of trust
        #[arg(long)]
        pubkey: Option<String>,

        /// SQLite database for cached trust scores
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a config file with every default filled in
    Init { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Watch {
            config,
            relays,
            pubkey,
            db,
        } => watch(config, relays, pubkey, db).await,
        Command::Config {
            command: ConfigCommand::Init { path },
        } => {
            save_config(&path, &Default::default())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}

async fn watch(
    config_path: Option<PathBuf>,
    relays: Vec<String>,
    pubkey: Option<String>,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config_path = config_path
        .or_else(satshoot::default_config_path)
        .context("no config path given and no platform config directory")?;
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if !relays.is_empty() {
        config.relays = relays;
    }
    if let Some(key) = &pubkey
        && !is_hex_key(key)
    {
        anyhow::bail!("--pubkey must be 64 lowercase hex characters");
    }

    let db_path = db
        .or_else(|| dirs::data_dir().map(|dir| dir.join("satshoot").join("satshoot.db")))
        .context("no database path given and no platform data directory")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let persistence: Arc<dyn Persistence> = Arc::new(
        SqlitePersistence::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?,
    );

    let pool = RelayPool::with_config(RelayConfig {
        connect_timeout: config.connection.connect_timeout(),
        ..Default::default()
    });
    let transport: Arc<dyn Transport> = Arc::new(pool);
    let session = Session::new(config, Arc::clone(&transport), persistence);

    let mut signals = session.connection().signals();
    let stats = session.connect().await;
    info!(
        "Connected to {} of {} relays",
        stats.connected, stats.total
    );

    if let Some(root) = &pubkey {
        let wot = session.wot();
        if let Err(e) = wot.load_persisted() {
            warn!("Could not load cached trust scores: {}", e);
        }
        let graph = RelayGraphSource::new(Arc::clone(&transport), wot.config());
        match wot.refresh_if_stale(root, &graph).await {
            Ok(Some(scores)) => info!("{} keys in the web of trust", scores.len()),
            Ok(None) => {}
            Err(e) => warn!("Web of trust unavailable: {}", e),
        }
    }

    let mut tickets = session.stores().all_tickets.subscribe();
    let mut offers = session.stores().all_offers.subscribe();
    session
        .start_public()
        .await
        .context("failed to start ticket and offer subscriptions")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            update = tickets.recv() => match update {
                Ok(StoreUpdate::Inserted(event)) => {
                    let trusted = pubkey.is_some() && session.wot().is_trusted(&event.pubkey);
                    print_ticket(event, trusted);
                }
                Ok(StoreUpdate::Eose) => println!("-- stored tickets loaded --"),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Skipped {} ticket updates", n),
                Err(RecvError::Closed) => break,
            },
            update = offers.recv() => match update {
                Ok(StoreUpdate::Inserted(event)) => print_offer(event),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Skipped {} offer updates", n),
                Err(RecvError::Closed) => break,
            },
            signal = signals.recv() => match signal {
                Ok(ConnectivitySignal::RelaysDown) => {
                    println!("!! all relays are down, waiting for connectivity");
                }
                Ok(ConnectivitySignal::Restored) => println!("!! connectivity restored"),
                Ok(other) => info!("{:?}", other),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    for store in session.stores().all() {
        store.stop();
    }
    Ok(())
}

fn print_ticket(event: Arc<nostr::Event>, trusted: bool) {
    let ticket = match Ticket::from_event(event) {
        Ok(ticket) => ticket,
        Err(e) => {
            warn!("Skipping ticket: {}", e);
            return;
        }
    };
    let title = ticket.title().unwrap_or("(untitled)");
    let status = ticket
        .status()
        .map(|status| format!("{:?}", status))
        .unwrap_or_else(|e| e.to_string());
    let marker = if trusted { "*" } else { " " };
    let short_id: String = ticket.id().chars().take(8).collect();
    println!("{} ticket {} [{}] {}", marker, short_id, status, title);
}

fn print_offer(event: Arc<nostr::Event>) {
    let offer = match Offer::from_event(event) {
        Ok(offer) => offer,
        Err(e) => {
            warn!("Skipping offer: {}", e);
            return;
        }
    };
    let amount = offer
        .amount()
        .map(|sats| format!("{} sats", sats))
        .unwrap_or_else(|e| e.to_string());
    let ticket = offer
        .ticket_address()
        .map(|address| address.identifier)
        .unwrap_or_else(|e| e.to_string());
    println!("  offer on {}: {}", ticket, amount);
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
