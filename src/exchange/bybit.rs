//! Bybit v5 REST gateway.
//!
//! Public market-data endpoints are retried with exponential backoff;
//! order submission is attempted exactly once so a reported failure is
//! always definite.

use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Candle, TradeSide};

use super::types::*;
use super::{CoinBalance, ExchangeGateway, OrderResult, Venue};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.bybit.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW: &str = "5000";

/// Bybit spot gateway. Without API credentials it runs read-only:
/// market data works, balance and order submission fail cleanly.
pub struct BybitGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BybitGateway {
    pub fn new(
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::gateway(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            api_key,
            api_secret,
        })
    }

    /// Build from `BYBIT_API_KEY` / `BYBIT_API_SECRET` when present.
    pub fn from_env() -> Result<Self, PipelineError> {
        let api_key = std::env::var("BYBIT_API_KEY").ok();
        let api_secret = std::env::var("BYBIT_API_SECRET").ok();
        if api_key.is_none() {
            info!("BYBIT_API_KEY not set; gateway is read-only");
        }
        Self::new(api_key, api_secret)
    }

    fn credentials(&self) -> Result<(&str, &str), PipelineError> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(k), Some(s)) => Ok((k, s)),
            _ => Err(PipelineError::configuration(
                "BYBIT_API_KEY / BYBIT_API_SECRET not configured",
            )),
        }
    }

    /// Public GET with exponential-backoff retry (read-only, safe).
    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, PipelineError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "GET");

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        };

        let response = backoff::future::retry(policy, || async {
            self.client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(backoff::Error::transient)
        })
        .await
        .map_err(|e| PipelineError::gateway(format!("GET {path} failed: {e}")))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PipelineError::gateway(format!("failed to parse {path} response: {e}")))?;

        unwrap_envelope(path, envelope)
    }

    /// Signed GET. No retry: treated like the signed POST path.
    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, PipelineError> {
        let (api_key, api_secret) = self.credentials()?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(api_secret, &format!("{timestamp}{api_key}{RECV_WINDOW}{query}"))?;

        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", &signature)
            .send()
            .await
            .map_err(|e| PipelineError::gateway(format!("GET {path} failed: {e}")))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PipelineError::gateway(format!("failed to parse {path} response: {e}")))?;

        unwrap_envelope(path, envelope)
    }

    /// Signed POST, attempted exactly once.
    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PipelineError> {
        let (api_key, api_secret) = self.credentials()?;
        let body_str = body.to_string();
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            api_secret,
            &format!("{timestamp}{api_key}{RECV_WINDOW}{body_str}"),
        )?;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", &signature)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| PipelineError::gateway(format!("POST {path} failed: {e}")))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PipelineError::gateway(format!("failed to parse {path} response: {e}")))?;

        unwrap_envelope(path, envelope)
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for BybitGateway {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, PipelineError> {
        let query = format!("category=spot&symbol={symbol}");
        let result: TickerResult = self.get_public("/v5/market/tickers", &query).await?;

        result
            .list
            .into_iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.last_price)
            .ok_or_else(|| PipelineError::gateway(format!("no ticker for {symbol}")))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, PipelineError> {
        let interval = interval_for(timeframe)?;
        let query = format!(
            "category=spot&symbol={symbol}&interval={interval}&limit={}",
            limit.min(1000)
        );
        let result: KlineResult = self.get_public("/v5/market/kline", &query).await?;

        // Rows arrive newest first; the pipeline wants newest last.
        let mut candles = result
            .list
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();

        Ok(candles)
    }

    async fn fetch_balance(&self) -> Result<Vec<CoinBalance>, PipelineError> {
        let result: WalletBalanceResult = self
            .get_signed("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;

        Ok(result
            .list
            .into_iter()
            .flat_map(|account| account.coin)
            .map(|c| CoinBalance {
                coin: c.coin,
                total: c.wallet_balance,
                available: c.available_to_withdraw,
            })
            .collect())
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: TradeSide,
        amount: Decimal,
    ) -> Result<OrderResult, PipelineError> {
        let side_str = match side {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        };
        let client_order_id = Uuid::new_v4().to_string();

        let body = serde_json::json!({
            "category": "spot",
            "symbol": symbol,
            "side": side_str,
            "orderType": "Market",
            "marketUnit": "baseCoin",
            "qty": amount.to_string(),
            "orderLinkId": client_order_id,
        });

        let result: OrderCreateResult = self.post_signed("/v5/order/create", &body).await?;

        if result.order_id.is_empty() {
            return Err(PipelineError::gateway(
                "order accepted without a confirmation id",
            ));
        }

        // The create endpoint returns no fill; a market order fills at
        // the touch, so the last trade is the best available estimate.
        let fill_price = self.fetch_price(symbol).await.map_err(|e| {
            PipelineError::gateway(format!(
                "order {} confirmed but fill price unavailable: {e}",
                result.order_id
            ))
        })?;

        info!(
            symbol = %symbol,
            side = %side_str,
            qty = %amount,
            order_id = %result.order_id,
            "Order executed"
        );

        Ok(OrderResult {
            order_id: result.order_id,
            fill_price,
            dry_run: false,
        })
    }
}

fn unwrap_envelope<T>(path: &str, envelope: ApiResponse<T>) -> Result<T, PipelineError> {
    if !envelope.is_ok() {
        return Err(PipelineError::gateway(format!(
            "{path} returned retCode {}: {}",
            envelope.ret_code, envelope.ret_msg
        )));
    }
    envelope
        .result
        .ok_or_else(|| PipelineError::gateway(format!("{path} returned an empty result")))
}

/// Map a human timeframe to a Bybit kline interval.
fn interval_for(timeframe: &str) -> Result<&'static str, PipelineError> {
    match timeframe {
        "1m" => Ok("1"),
        "5m" => Ok("5"),
        "15m" => Ok("15"),
        "30m" => Ok("30"),
        "1h" => Ok("60"),
        "4h" => Ok("240"),
        "1d" => Ok("D"),
        other => Err(PipelineError::configuration(format!(
            "unsupported timeframe '{other}'"
        ))),
    }
}

/// Parse one kline row: [startTime, open, high, low, close, volume, ...].
fn parse_kline_row(row: &[String]) -> Result<Candle, PipelineError> {
    if row.len() < 6 {
        return Err(PipelineError::gateway(format!(
            "malformed kline row with {} fields",
            row.len()
        )));
    }

    let millis: i64 = row[0]
        .parse()
        .map_err(|_| PipelineError::gateway(format!("bad kline timestamp '{}'", row[0])))?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PipelineError::gateway(format!("out-of-range kline timestamp {millis}")))?;

    let field = |i: usize| -> Result<Decimal, PipelineError> {
        row[i]
            .parse()
            .map_err(|_| PipelineError::gateway(format!("bad kline field '{}'", row[i])))
    };

    Ok(Candle::new(
        timestamp,
        field(1)?,
        field(2)?,
        field(3)?,
        field(4)?,
        field(5)?,
    ))
}

fn sign(secret: &str, payload: &str) -> Result<String, PipelineError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PipelineError::configuration("invalid API secret"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
