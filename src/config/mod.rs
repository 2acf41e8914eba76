use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub binance: BinanceConfig,
    pub martingale: MartingaleConfig,
    pub safety: SafetyConfig,
    pub scanning: ScanningConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_testnet_rest_url")]
    pub testnet_rest_url: String,
}

fn default_rest_url() -> String { "https://fapi.binance.com".to_string() }
fn default_testnet_rest_url() -> String { "https://testnet.binancefuture.com".to_string() }

impl BinanceConfig {
    /// Base URL honoring the testnet switch.
    pub fn base_url(&self) -> &str {
        if self.testnet {
            &self.testnet_rest_url
        } else {
            &self.rest_url
        }
    }
}

/// Martingale ladder tables. All three step lists are indexed by rung and
/// must have equal length; `validate()` enforces that at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MartingaleConfig {
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Margin (USDT) committed per rung.
    pub steps: Vec<f64>,
    /// Adverse move (%) required before each rung triggers.
    pub step_distances: Vec<f64>,
    /// Cooldown (minutes) before each rung may fire.
    pub step_wait_times: Vec<u64>,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_min_pump_percent")]
    pub min_pump_percent: f64,
    #[serde(default = "default_min_rsi_entry")]
    pub min_rsi_entry: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit_percent: f64,
}

fn default_leverage() -> u32 { 3 }
fn default_max_positions() -> usize { 5 }
fn default_min_pump_percent() -> f64 { 30.0 }
fn default_min_rsi_entry() -> f64 { 70.0 }
fn default_take_profit() -> f64 { 1.5 }

impl MartingaleConfig {
    pub fn max_steps(&self) -> u32 {
        self.steps.len() as u32
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default = "default_rsi_circuit_breaker")]
    pub rsi_circuit_breaker: f64,
    #[serde(default = "default_max_vol_multiplier")]
    pub max_vol_multiplier: f64,
}

fn default_rsi_circuit_breaker() -> f64 { 90.0 }
fn default_max_vol_multiplier() -> f64 { 2.0 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanningConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_top_pairs")]
    pub top_pairs: usize,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_min_volume")]
    pub min_volume_usdt: f64,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

fn default_interval() -> u64 { 30 }
fn default_top_pairs() -> usize { 10 }
fn default_quote_asset() -> String { "USDT".to_string() }
fn default_min_volume() -> f64 { 10_000_000.0 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    #[serde(default = "default_kline_limit")]
    pub kline_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            kline_interval: default_kline_interval(),
            kline_limit: default_kline_limit(),
        }
    }
}

fn default_rsi_period() -> usize { 14 }
fn default_kline_interval() -> String { "1m".to_string() }
fn default_kline_limit() -> usize { 20 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Upper bound for one full tick, including all exchange calls.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_seconds: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            tick_timeout_seconds: default_tick_timeout(),
        }
    }
}

fn default_state_file() -> String { "positions.json".to_string() }
fn default_tick_timeout() -> u64 { 25 }

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl Config {
    pub fn load() -> Result<Arc<Self>> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("BOT").separator("_"));

        // Load API keys from environment
        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            builder = builder.set_override("binance.api_key", api_key)?;
        }

        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            builder = builder.set_override("binance.api_secret", api_secret)?;
        }

        if let Ok(testnet) = std::env::var("USE_TESTNET") {
            if testnet.eq_ignore_ascii_case("true") {
                builder = builder.set_override("binance.testnet", true)?;
            }
        }

        let config = builder.build()?;
        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(Arc::new(config))
    }

    /// Startup validation: the ladder tables must be coherent before any
    /// decision logic runs. Errors here halt the process.
    pub fn validate(&self) -> Result<()> {
        let m = &self.martingale;
        if m.steps.is_empty() {
            bail!("martingale.steps must not be empty");
        }
        if m.steps.len() != m.step_distances.len() {
            bail!(
                "martingale.step_distances length {} does not match steps length {}",
                m.step_distances.len(),
                m.steps.len()
            );
        }
        if m.steps.len() != m.step_wait_times.len() {
            bail!(
                "martingale.step_wait_times length {} does not match steps length {}",
                m.step_wait_times.len(),
                m.steps.len()
            );
        }
        if m.steps.iter().any(|s| *s <= 0.0) {
            bail!("martingale.steps must all be positive margin amounts");
        }
        if m.leverage < 1 {
            bail!("martingale.leverage must be at least 1");
        }
        if self.safety.max_vol_multiplier < 1.0 {
            bail!("safety.max_vol_multiplier must be at least 1.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            binance: BinanceConfig {
                api_key: None,
                api_secret: None,
                testnet: true,
                rest_url: default_rest_url(),
                testnet_rest_url: default_testnet_rest_url(),
            },
            martingale: MartingaleConfig {
                leverage: 3,
                steps: vec![10.0, 10.0, 20.0],
                step_distances: vec![1.0, 2.0, 3.0],
                step_wait_times: vec![5, 10, 15],
                max_positions: 5,
                min_pump_percent: 30.0,
                min_rsi_entry: 70.0,
                take_profit_percent: 1.5,
            },
            safety: SafetyConfig {
                rsi_circuit_breaker: 90.0,
                max_vol_multiplier: 2.0,
            },
            scanning: ScanningConfig {
                interval_seconds: 30,
                top_pairs: 10,
                quote_asset: "USDT".to_string(),
                min_volume_usdt: 1_000_000.0,
                blacklist: vec![],
            },
            analysis: AnalysisConfig::default(),
            system: SystemConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn mismatched_step_tables_are_fatal() {
        let mut cfg = base_config();
        cfg.martingale.step_distances.pop();
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.martingale.step_wait_times.push(20);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_steps_are_fatal() {
        let mut cfg = base_config();
        cfg.martingale.steps.clear();
        cfg.martingale.step_distances.clear();
        cfg.martingale.step_wait_times.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_leverage_is_fatal() {
        let mut cfg = base_config();
        cfg.martingale.leverage = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn testnet_switch_selects_base_url() {
        let mut cfg = base_config();
        assert!(cfg.binance.base_url().contains("testnet"));
        cfg.binance.testnet = false;
        assert_eq!(cfg.binance.base_url(), "https://fapi.binance.com");
    }
}
