use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::time::Duration;
use url::form_urlencoded;

use super::auth::BinanceAuth;
use super::types::*;
use super::ExchangeClient;

/// REST client for the Binance USDⓈ-M futures API.
pub struct BinanceClient {
    http: Client,
    auth: Option<BinanceAuth>,
    base_url: String,
    recv_window: u64,
}

impl BinanceClient {
    pub fn new(base_url: String, auth: Option<BinanceAuth>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            auth,
            base_url,
            recv_window: 5000,
        }
    }

    fn auth(&self) -> Result<&BinanceAuth> {
        self.auth
            .as_ref()
            .context("API credentials not configured for signed endpoint")
    }

    /// Query string with recvWindow/timestamp appended and the whole thing
    /// signed, as SIGNED endpoints require.
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let auth = self.auth()?;

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("recvWindow", &self.recv_window.to_string());
        serializer.append_pair(
            "timestamp",
            &chrono::Utc::now().timestamp_millis().to_string(),
        );
        let query = serializer.finish();

        let signature = auth.sign(&query);
        Ok(format!("{query}&signature={signature}"))
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .context("HTTP request failed")?;
        Self::decode(response).await
    }

    async fn signed_get(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", self.auth()?.api_key())
            .send()
            .await
            .context("HTTP request failed")?;
        Self::decode(response).await
    }

    async fn signed_post(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", self.auth()?.api_key())
            .send()
            .await
            .context("HTTP request failed")?;
        Self::decode(response).await
    }

    /// Surface exchange-level errors (`{"code": -xxxx, "msg": ...}`) as
    /// transport errors; they are handled at the tick boundary.
    async fn decode(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = response.json().await.context("decoding response body")?;

        if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
            if code < 0 {
                let msg = body
                    .get("msg")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                bail!("exchange error {code}: {msg}");
            }
        }
        if !status.is_success() {
            bail!("HTTP {status}: {body}");
        }

        Ok(body)
    }

    /// LOT_SIZE step for a symbol. Falls back to 1.0 with a warning when
    /// exchange info cannot be fetched, so order placement still proceeds.
    async fn lot_step(&self, symbol: &str) -> f64 {
        let result: Result<f64> = async {
            let info = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
            let symbols = info["symbols"]
                .as_array()
                .context("exchangeInfo.symbols missing")?;

            for s in symbols {
                if s["symbol"].as_str() == Some(symbol) {
                    for f in s["filters"].as_array().into_iter().flatten() {
                        if f["filterType"].as_str() == Some("LOT_SIZE") {
                            let step = f["stepSize"]
                                .as_str()
                                .context("stepSize not a string")?
                                .parse::<f64>()?;
                            return Ok(step);
                        }
                    }
                }
            }
            bail!("no LOT_SIZE filter for {symbol}");
        }
        .await;

        match result {
            Ok(step) if step > 0.0 => step,
            Ok(_) => 1.0,
            Err(e) => {
                tracing::warn!("Failed to get lot step for {}, defaulting to 1.0: {}", symbol, e);
                1.0
            }
        }
    }

    fn format_quantity(quantity: f64, step: f64) -> String {
        let adjusted = if step > 0.0 {
            (quantity / step).floor() * step
        } else {
            quantity
        };

        let precision = if step < 1.0 && step > 0.0 {
            (-step.log10()).round() as usize
        } else {
            0
        };
        format!("{adjusted:.precision$}")
    }
}

impl ExchangeClient for BinanceClient {
    async fn server_time(&self) -> Result<i64> {
        let body = self.public_get("/fapi/v1/time", &[]).await?;
        body["serverTime"]
            .as_i64()
            .context("serverTime missing from response")
    }

    async fn price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .public_get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        body["price"]
            .as_str()
            .context("price missing from response")?
            .parse()
            .context("price is not numeric")
    }

    async fn ticker_24h(&self) -> Result<Vec<Ticker24h>> {
        let body = self.public_get("/fapi/v1/ticker/24hr", &[]).await?;
        let raw: Vec<Ticker24hRaw> =
            serde_json::from_value(body).context("decoding 24h ticker list")?;
        Ok(raw.into_iter().map(Ticker24h::from).collect())
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>> {
        let body = self
            .public_get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let rows = body.as_array().context("klines response is not an array")?;
        rows.iter().map(Kline::from_row).collect()
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>> {
        let body = self.signed_get("/fapi/v2/positionRisk", &[]).await?;
        let rows = body
            .as_array()
            .context("positionRisk response is not an array")?;

        let mut active = Vec::new();
        for row in rows {
            let amt: f64 = row["positionAmt"]
                .as_str()
                .unwrap_or("0")
                .parse()
                .unwrap_or(0.0);
            if amt.abs() == 0.0 {
                continue;
            }

            active.push(ExchangePosition {
                symbol: row["symbol"].as_str().unwrap_or_default().to_string(),
                position_amt: amt,
                entry_price: row["entryPrice"]
                    .as_str()
                    .unwrap_or("0")
                    .parse()
                    .unwrap_or(0.0),
                leverage: row["leverage"]
                    .as_str()
                    .unwrap_or("1")
                    .parse()
                    .unwrap_or(1.0),
            });
        }
        Ok(active)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<f64> {
        let step = self.lot_step(symbol).await;
        let qty_str = Self::format_quantity(quantity, step);
        tracing::debug!("Adjusted quantity for {}: {} (step {})", symbol, qty_str, step);

        let body = self
            .signed_post(
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", qty_str),
                    ("newOrderRespType", "RESULT".to_string()),
                ],
            )
            .await?;

        // A fill price of 0 is a valid "not reported" outcome; the caller
        // falls back to the last ticker price.
        let avg = body["avgPrice"]
            .as_str()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(avg)
    }

    async fn place_stop_market(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
    ) -> Result<()> {
        self.signed_post(
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", "STOP_MARKET".to_string()),
                ("stopPrice", format!("{stop_price:.4}")),
                ("closePosition", "true".to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn place_take_profit(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
    ) -> Result<()> {
        self.signed_post(
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", "TAKE_PROFIT_MARKET".to_string()),
                ("stopPrice", format!("{stop_price:.4}")),
                ("closePosition", "true".to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}
