//! RSI signal generator.
//!
//! Pure function of its inputs and configuration: no market access, no
//! owned state beyond the thresholds.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{closes, Candle, Signal, SignalAction};

/// Signal generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// RSI lookback period (number of deltas averaged)
    pub rsi_period: usize,

    /// Buy below this RSI level
    pub oversold: f64,

    /// Sell above this RSI level
    pub overbought: f64,

    /// Stop-loss distance from entry (fraction, e.g. 0.02 = 2%)
    pub stop_loss_pct: Decimal,

    /// Take-profit distance from entry (fraction, 2:1 reward:risk default)
    pub take_profit_pct: Decimal,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.04),
        }
    }
}

impl SignalConfig {
    /// Default config with thresholds taken from the environment when set
    /// (`RSI_PERIOD`, `RSI_OVERSOLD`, `RSI_OVERBOUGHT`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("RSI_PERIOD") {
            if let Ok(value) = raw.parse::<usize>() {
                config.rsi_period = value;
            }
        }
        if let Ok(raw) = std::env::var("RSI_OVERSOLD") {
            if let Ok(value) = raw.parse::<f64>() {
                config.oversold = value;
            }
        }
        if let Ok(raw) = std::env::var("RSI_OVERBOUGHT") {
            if let Ok(value) = raw.parse::<f64>() {
                config.overbought = value;
            }
        }
        config
    }
}

/// Relative strength index over a close series, newest last.
///
/// Returns `None` when fewer than `period + 1` closes are available
/// (no defined value). With no losses in the window the RSI is 100:
/// maximal strength, nothing to normalize against.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let window = &deltas[deltas.len() - period..];
    let avg_gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// RSI oversold/overbought strategy with fixed percentage stop/target
/// bands around the current close.
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    config: SignalConfig,
}

impl RsiStrategy {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Evaluate an ordered bar sequence (newest last) into a signal.
    pub fn evaluate(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Signal {
        let price = candles
            .last()
            .map(|c| c.close)
            .unwrap_or(Decimal::ZERO);

        let series = closes(candles);
        let Some(value) = rsi(&series, self.config.rsi_period) else {
            return Signal::wait(symbol, timeframe, 50.0, price, "insufficient data".to_string());
        };

        let (action, reason) = if value < self.config.oversold {
            (
                SignalAction::Buy,
                format!("RSI oversold: {:.1} < {}", value, self.config.oversold),
            )
        } else if value > self.config.overbought {
            (
                SignalAction::Sell,
                format!("RSI overbought: {:.1} > {}", value, self.config.overbought),
            )
        } else {
            (SignalAction::Wait, format!("RSI: {:.1}", value))
        };

        let (stop_loss, take_profit) = match action {
            SignalAction::Buy => (
                Some(price * (Decimal::ONE - self.config.stop_loss_pct)),
                Some(price * (Decimal::ONE + self.config.take_profit_pct)),
            ),
            SignalAction::Sell => (
                Some(price * (Decimal::ONE + self.config.stop_loss_pct)),
                Some(price * (Decimal::ONE - self.config.take_profit_pct)),
            ),
            SignalAction::Wait => (None, None),
        };

        Signal {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            action,
            rsi: value,
            reference_price: price,
            stop_loss,
            take_profit,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;

    fn candles_from_closes(values: &[f64]) -> Vec<Candle> {
        values
            .iter()
            .map(|v| {
                let d = Decimal::from_f64(*v).unwrap();
                Candle::new(Utc::now(), d, d, d, d, Decimal::ONE)
            })
            .collect()
    }

    #[test]
    fn insufficient_data_defaults_to_neutral_wait() {
        let strategy = RsiStrategy::new(SignalConfig::default());
        let bars = candles_from_closes(&[100.0; 10]); // need 15

        let signal = strategy.evaluate("BTCUSDT", "1h", &bars);
        assert_eq!(signal.action, SignalAction::Wait);
        assert_eq!(signal.rsi, 50.0);
        assert_eq!(signal.reason, "insufficient data");
        assert!(signal.stop_loss.is_none());
        assert!(signal.take_profit.is_none());
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let series: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i * 37) % 11) as f64 - 5.0)
            .collect();

        for end in 15..=series.len() {
            let value = rsi(&series[..end], 14).unwrap();
            assert!((0.0..=100.0).contains(&value), "rsi out of range: {value}");
        }
    }

    #[test]
    fn all_gain_window_is_maximal() {
        let series: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&series, 14), Some(100.0));
    }

    #[test]
    fn short_series_has_no_defined_value() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 14), None);
        // Exactly period + 1 closes is enough
        let series: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&series, 14).is_some());
    }

    #[test]
    fn falling_market_signals_buy_with_bands() {
        let strategy = RsiStrategy::new(SignalConfig::default());
        // Strictly declining closes: all losses, RSI 0
        let series: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let bars = candles_from_closes(&series);

        let signal = strategy.evaluate("BTCUSDT", "1h", &bars);
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.rsi, 0.0);

        let price = signal.reference_price;
        assert_eq!(signal.stop_loss, Some(price * dec!(0.98)));
        assert_eq!(signal.take_profit, Some(price * dec!(1.04)));
    }

    #[test]
    fn rising_market_signals_sell_with_bands() {
        let strategy = RsiStrategy::new(SignalConfig::default());
        let series: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let bars = candles_from_closes(&series);

        let signal = strategy.evaluate("ETHUSDT", "1h", &bars);
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.rsi, 100.0);

        let price = signal.reference_price;
        assert_eq!(signal.stop_loss, Some(price * dec!(1.02)));
        assert_eq!(signal.take_profit, Some(price * dec!(0.96)));
    }

    #[test]
    fn balanced_market_waits() {
        let strategy = RsiStrategy::new(SignalConfig::default());
        // Alternating +1/-1: gains equal losses, RSI 50
        let series: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let bars = candles_from_closes(&series);

        let signal = strategy.evaluate("SOLUSDT", "1h", &bars);
        assert_eq!(signal.action, SignalAction::Wait);
        assert!((signal.rsi - 50.0).abs() < 1e-9);
        assert!(signal.stop_loss.is_none());
    }

    #[test]
    fn thresholds_are_configurable() {
        let config = SignalConfig {
            oversold: 55.0,
            overbought: 99.0,
            ..Default::default()
        };
        let strategy = RsiStrategy::new(config);

        // RSI 50 series is now below the oversold line
        let series: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let bars = candles_from_closes(&series);

        let signal = strategy.evaluate("BTCUSDT", "1h", &bars);
        assert_eq!(signal.action, SignalAction::Buy);
    }
}
