//! Wire types for the Bybit v5 REST API.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Envelope every v5 endpoint returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    pub ret_msg: String,
    pub result: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.ret_code == 0
    }
}

/// Result of /v5/market/kline. Rows are string arrays
/// [startTime, open, high, low, close, volume, turnover], newest first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineResult {
    pub list: Vec<Vec<String>>,
}

/// Result of /v5/market/tickers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerResult {
    pub list: Vec<TickerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerEntry {
    pub symbol: String,
    pub last_price: Decimal,
}

/// Result of /v5/order/create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateResult {
    #[serde(default)]
    pub order_id: String,
}

/// Result of /v5/account/wallet-balance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalanceResult {
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCoin {
    pub coin: String,
    #[serde(default)]
    pub wallet_balance: Decimal,
    #[serde(default)]
    pub available_to_withdraw: Decimal,
}
