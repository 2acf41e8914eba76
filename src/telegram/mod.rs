use anyhow::Result;
use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const STARTUP_COOLDOWN_SECS: i64 = 600;

/// Best-effort Telegram notifications for position lifecycle events.
/// Every call is fire-and-forget from the engine's point of view; a failed
/// send is logged by the caller and never affects the tick.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
    last_startup: Arc<AtomicI64>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            bot_token,
            chat_id,
            last_startup: Arc::new(AtomicI64::new(0)),
        }
    }

    pub async fn send_message(&self, message: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        self.client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "HTML"
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    /// Startup ping, rate-limited so a crash loop does not spam the chat.
    pub async fn notify_startup(&self, testnet: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let last = self.last_startup.load(Ordering::Relaxed);
        if now - last < STARTUP_COOLDOWN_SECS {
            return Ok(false);
        }
        self.last_startup.store(now, Ordering::Relaxed);

        let network = if testnet { "TESTNET" } else { "MAINNET" };
        let message = format!(
            "🤖 <b>Martingale Bot Started</b>\n\n🌐 Network: {}\n✅ Status: Running",
            network
        );
        self.send_message(&message).await?;
        Ok(true)
    }

    pub async fn notify_shutdown(&self, open_positions: usize) -> Result<()> {
        let message = format!(
            "👋 <b>Bot Stopped</b>\n\n📈 Open positions left running: {}",
            open_positions
        );
        self.send_message(&message).await
    }

    pub async fn notify_position_opened(
        &self,
        symbol: &str,
        entry_price: f64,
        quantity: f64,
        margin: f64,
    ) -> Result<()> {
        let message = format!(
            "🔴 <b>Short Opened</b>\n\n\
             📊 {}\n\
             💵 Entry: {:.4}\n\
             📦 Qty: {:.4}\n\
             💰 Margin: ${:.2}",
            symbol, entry_price, quantity, margin
        );
        self.send_message(&message).await
    }

    pub async fn notify_step_added(
        &self,
        symbol: &str,
        step: u32,
        max_steps: u32,
        avg_entry: f64,
        total_margin: f64,
    ) -> Result<()> {
        let message = format!(
            "➕ <b>Step Added</b>\n\n\
             📊 {} now at step {}/{}\n\
             💵 Avg entry: {:.4}\n\
             💰 Total margin: ${:.2}",
            symbol, step, max_steps, avg_entry, total_margin
        );
        self.send_message(&message).await
    }

    pub async fn notify_position_adopted(&self, symbol: &str, step: u32) -> Result<()> {
        let message = format!(
            "🆕 <b>Position Adopted</b>\n\n\
             📊 {} found open on exchange, tracked at step {}",
            symbol, step
        );
        self.send_message(&message).await
    }

    pub async fn notify_position_closed(&self, symbol: &str) -> Result<()> {
        let message = format!(
            "✅ <b>Position Closed</b>\n\n📊 {} no longer open on exchange",
            symbol
        );
        self.send_message(&message).await
    }
}
