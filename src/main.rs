use anyhow::{Context, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use binance_martingale_bot::binance::{BinanceAuth, BinanceClient, ExchangeClient};
use binance_martingale_bot::config::Config;
use binance_martingale_bot::engine::BotEngine;
use binance_martingale_bot::ledger::PositionLedger;
use binance_martingale_bot::TelegramNotifier;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Binance Martingale Bot - Starting...");

    // Load configuration (validation failures halt the process)
    let config = Config::load()?;
    info!("✅ Configuration loaded");
    info!("   Steps: {} rungs, leverage {}x", config.martingale.steps.len(), config.martingale.leverage);
    info!("   Scan: top {} pairs every {}s", config.scanning.top_pairs, config.scanning.interval_seconds);
    info!("   Testnet: {}", config.binance.testnet);

    // Initialize Telegram notifier
    let notifier = if config.telegram.enabled {
        match (&config.telegram.bot_token, &config.telegram.chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() => {
                info!("📱 Telegram notifications enabled");
                let notifier = TelegramNotifier::new(token.clone(), chat_id.clone());
                match notifier.notify_startup(config.binance.testnet).await {
                    Ok(true) => info!("📱 Startup notification sent"),
                    Ok(false) => info!("📱 Startup notification blocked (cooldown)"),
                    Err(e) => warn!("Failed to send startup notification: {}", e),
                }
                Some(notifier)
            }
            _ => {
                info!("📱 Telegram not fully configured, notifications disabled");
                None
            }
        }
    } else {
        None
    };
    let notifier_shutdown = notifier.clone();

    // Initialize Binance REST client
    let auth = match (&config.binance.api_key, &config.binance.api_secret) {
        (Some(api_key), Some(api_secret)) => {
            Some(BinanceAuth::new(api_key.clone(), api_secret.clone()))
        }
        _ => {
            warn!("No API credentials configured, signed endpoints will fail");
            None
        }
    };
    let client = BinanceClient::new(config.binance.base_url().to_string(), auth);
    info!("✅ REST client initialized");

    // Connectivity check
    let server_time = client
        .server_time()
        .await
        .context("Connectivity verification failed")?;
    info!("✅ Connected | server time: {}", server_time);

    // Load persisted positions. A corrupt ledger is fatal: starting empty
    // against a live account could double-open real positions.
    let ledger = PositionLedger::load(&config.system.state_file)
        .context("Refusing to start with unreadable position state")?;
    info!("✅ Loaded {} active positions from disk", ledger.len());

    let mut engine = BotEngine::new(config.clone(), client, ledger, notifier);

    // Shutdown: finish the in-flight tick, never start the next one
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("🚦 Starting main loop...");
    engine.run(shutdown_rx).await;

    if let Some(notifier) = notifier_shutdown {
        if let Err(e) = notifier.notify_shutdown(engine.ledger().len()).await {
            warn!("Failed to send shutdown notification: {}", e);
        }
    }

    info!("👋 Bot stopped");
    Ok(())
}
