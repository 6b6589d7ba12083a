//! Pure, synchronous technical-indicator functions.
//!
//! Ported from `MetricsCalculator` in the original Python service: same
//! window requirements, same neutral defaults on insufficient data, same
//! zero-guards on every divisor.

use crate::models::{MacdStatus, MaPosition, Technicals};

/// EMA with pandas' `ewm(span=period, adjust=False)` recursion:
/// `ema[0] = x[0]`, `ema[t] = a*x[t] + (1-a)*ema[t-1]`, `a = 2/(period+1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// RSI(period) on a closing-price series, newest last.
/// Fewer than `period + 1` prices returns the documented neutral value 50.0.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let window = &deltas[deltas.len() - period..];
    let avg_gain: f64 = window.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let avg_loss: f64 = window.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;
    let avg_loss = if avg_loss == 0.0 { 1e-10 } else { avg_loss };
    let rs = avg_gain / avg_loss;
    let value = 100.0 - (100.0 / (1.0 + rs));
    if value.is_nan() {
        50.0
    } else {
        value
    }
}

pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub status: MacdStatus,
}

/// MACD(fast, slow, signal). Status is decided on the sign flip of the
/// prior histogram value vs. the latest one.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    if closes.len() < slow + signal {
        return Macd {
            macd: 0.0,
            signal: 0.0,
            histogram: 0.0,
            status: MacdStatus::Neutral,
        };
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let macd_line: Vec<f64> = fast_ema.iter().zip(slow_ema.iter()).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    let macd_current = *macd_line.last().unwrap();
    let signal_current = *signal_line.last().unwrap();
    let histogram_current = *histogram.last().unwrap();

    let status = if histogram.len() >= 2 {
        let prev = histogram[histogram.len() - 2];
        if prev < 0.0 && histogram_current > 0.0 {
            MacdStatus::GoldenCross
        } else if prev > 0.0 && histogram_current < 0.0 {
            MacdStatus::DeadCross
        } else {
            MacdStatus::Neutral
        }
    } else {
        MacdStatus::Neutral
    };

    Macd {
        macd: macd_current,
        signal: signal_current,
        histogram: histogram_current,
        status,
    }
}

/// Requires >= 14 days of history; otherwise returns the neutral default
/// bundle (rsi=50, macd_status=neutral, ma_position=중립).
pub fn technicals(closes: &[f64]) -> Technicals {
    if closes.len() < 14 {
        return Technicals::default();
    }
    let r = rsi(closes, 14);
    let m = macd(closes, 12, 26, 9);
    let sma5 = sma(closes, 5).unwrap_or(0.0);
    let sma20 = sma(closes, 20).unwrap_or(0.0);
    let sma60 = sma(closes, 60).unwrap_or(0.0);

    let current = *closes.last().unwrap();
    let ma_position = if sma20 > 0.0 {
        let band = sma20 * 0.02;
        if current > sma20 + band {
            MaPosition::Above
        } else if current < sma20 - band {
            MaPosition::Below
        } else {
            MaPosition::Neutral
        }
    } else {
        MaPosition::Neutral
    };

    Technicals {
        rsi: r,
        macd: m.macd,
        macd_signal: m.signal,
        macd_histogram: m.histogram,
        macd_status: m.status,
        sma5,
        sma20,
        sma60,
        ma_position,
    }
}

/// Mean of the last `period` True Ranges over the most recent `period+1`
/// bars. Fewer bars returns `None`.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if n < period + 1 || highs.len() != n || lows.len() != n {
        return None;
    }
    let mut true_ranges = Vec::with_capacity(period);
    for i in (n - period)..n {
        let high_low = highs[i] - lows[i];
        let high_close = (highs[i] - closes[i - 1]).abs();
        let low_close = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }
    Some(true_ranges.iter().sum::<f64>() / period as f64)
}

/// Gap% = (open / prev_close - 1) * 100.
pub fn gap_ratio(open: f64, prev_close: f64) -> f64 {
    if prev_close == 0.0 {
        0.0
    } else {
        (open / prev_close - 1.0) * 100.0
    }
}

/// Intraday change% = (close / open - 1) * 100.
pub fn intraday_change(close: f64, open: f64) -> f64 {
    if open == 0.0 {
        0.0
    } else {
        (close / open - 1.0) * 100.0
    }
}

/// Volume change% = (current / prev - 1) * 100.
pub fn volume_change(current: f64, prev: f64) -> f64 {
    if prev == 0.0 {
        0.0
    } else {
        (current / prev - 1.0) * 100.0
    }
}

/// Closing strength: clip((close - low) / (high - low), 0, 1), divisor
/// protected against the flat-bar case.
pub fn closing_strength(close: f64, high: f64, low: f64) -> f64 {
    let denom = high - low;
    let denom = if denom == 0.0 { 0.01 } else { denom };
    ((close - low) / denom).clamp(0.0, 1.0)
}

/// inflow_ratio = 100 * trading_value / market_cap.
pub fn fund_inflow_ratio(trading_value: f64, market_cap: f64) -> f64 {
    if market_cap == 0.0 {
        0.0
    } else {
        (trading_value / market_cap) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rsi_monotone_increasing_approaches_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&closes, 14) > 95.0);
    }

    #[test]
    fn rsi_monotone_decreasing_approaches_0() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        assert!(rsi(&closes, 14) < 5.0);
    }

    #[test]
    fn rsi_constant_is_neutral() {
        let closes = vec![100.0; 20];
        assert_relative_eq!(rsi(&closes, 14), 50.0, epsilon = 1e-6);
    }

    #[test]
    fn rsi_insufficient_history_is_neutral() {
        let closes = vec![100.0, 101.0, 102.0];
        assert_relative_eq!(rsi(&closes, 14), 50.0);
    }

    #[test]
    fn macd_status_golden_cross_on_histogram_sign_flip() {
        // A falling-then-rising series to flip histogram sign.
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * 0.5).collect();
        closes.extend((0..10).map(|i| 80.0 + i as f64 * 3.0));
        let m = macd(&closes, 12, 26, 9);
        assert!(matches!(m.status, MacdStatus::GoldenCross | MacdStatus::Neutral));
    }

    #[test]
    fn atr_constant_true_range_returns_constant() {
        let highs = vec![110.0; 20];
        let lows = vec![100.0; 20];
        let closes = vec![105.0; 20];
        let value = atr(&highs, &lows, &closes, 14).unwrap();
        assert_relative_eq!(value, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn atr_insufficient_bars_is_none() {
        let highs = vec![110.0; 5];
        let lows = vec![100.0; 5];
        let closes = vec![105.0; 5];
        assert!(atr(&highs, &lows, &closes, 14).is_none());
    }

    #[test]
    fn closing_strength_clips_and_guards_zero_range() {
        assert_relative_eq!(closing_strength(100.0, 100.0, 100.0), 0.0);
        assert_relative_eq!(closing_strength(110.0, 110.0, 100.0), 1.0);
    }

    #[test]
    fn fund_inflow_ratio_guards_zero_cap() {
        assert_relative_eq!(fund_inflow_ratio(1000.0, 0.0), 0.0);
    }
}
