//! Top-N Ranker (C7): the seven-stage momentum/volume/technical/sentiment
//! pipeline of spec.md §4.6, implemented verbatim including the exact
//! coefficients.

use crate::gateway::MarketDataGateway;
use crate::llm::{Embedder, LlmClient};
use crate::models::{FilteredStock, MaPosition, MacdStatus, MarketSnapshotRow, Technicals, Ticker};
use crate::normalize;
use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RankedStock {
    pub ticker: Ticker,
    pub name: String,
    pub momentum_score: f64,
    pub volume_score: f64,
    pub technical_score: f64,
    pub sentiment_score: f64,
    pub base_score: f64,
    pub final_score: f64,
}

struct JoinedRow {
    ticker: Ticker,
    name: String,
    snapshot: MarketSnapshotRow,
}

fn join_universe(
    snapshot: &HashMap<Ticker, MarketSnapshotRow>,
    universe: &[FilteredStock],
) -> Vec<JoinedRow> {
    universe
        .iter()
        .filter(|s| s.per > 0.0 && s.pbr > 0.0 && s.market_cap > 0)
        .filter_map(|s| {
            let row = snapshot.get(&s.ticker)?;
            if row.close <= 0.0 {
                return None;
            }
            Some(JoinedRow {
                ticker: s.ticker.clone(),
                name: s.name.clone(),
                snapshot: row.clone(),
            })
        })
        .collect()
}

/// Momentum (40%): D-1/D-5/D-20 returns, robust-then-minmax normalized,
/// weighted 0.4/0.35/0.25, scaled to 0-10. Missing history → neutral 5.0.
fn momentum_scores(returns_d1: &[f64], returns_d5: &[f64], returns_d20: &[f64], valid: &[bool]) -> Vec<f64> {
    let n = returns_d1.len();
    let norm = |values: &[f64]| -> Vec<f64> {
        let robust = normalize::robust(values);
        normalize::min_max(&robust, 0.0, 1.0)
    };
    let n1 = norm(returns_d1);
    let n5 = norm(returns_d5);
    let n20 = norm(returns_d20);

    (0..n)
        .map(|i| {
            if !valid[i] {
                return 5.0;
            }
            let combined = 0.4 * n1[i] + 0.35 * n5[i] + 0.25 * n20[i];
            combined * 10.0
        })
        .collect()
}

/// Volume (30%): ln(max(increase%+100,1)) and ln(max(trading_value,1)),
/// percentile-clip(5,95) each, combine 0.6/0.4, scale to 0-10.
fn volume_scores(volume_increase_pct: &[f64], trading_values: &[f64]) -> Vec<f64> {
    let adjusted: Vec<f64> = volume_increase_pct.iter().map(|v| (v + 100.0).max(1.0)).collect();
    let log_adjusted = normalize::log_normalize(&adjusted, None);
    let log_trading = normalize::log_normalize(trading_values, None);

    let n1 = normalize::percentile_clip(&log_adjusted, 5.0, 95.0);
    let n2 = normalize::percentile_clip(&log_trading, 5.0, 95.0);

    n1.iter().zip(n2.iter()).map(|(a, b)| (0.6 * a + 0.4 * b) * 10.0).collect()
}

/// Technical (20%): RSI +/-5, MACD +/-5, MA +/-3 summed in [-13,13],
/// linearly rescaled to [0,10].
fn technical_score(t: &Technicals) -> f64 {
    let mut points = 0.0;
    if t.rsi > 70.0 {
        points -= 5.0;
    } else if t.rsi < 30.0 {
        points += 5.0;
    }
    points += match t.macd_status {
        MacdStatus::GoldenCross => 5.0,
        MacdStatus::DeadCross => -5.0,
        MacdStatus::Neutral => 0.0,
    };
    points += match t.ma_position {
        MaPosition::Above => 3.0,
        MaPosition::Below => -3.0,
        MaPosition::Neutral => 0.0,
    };
    // Rescale [-13, 13] -> [0, 10]
    (points + 13.0) / 26.0 * 10.0
}

/// Rank (1..n, rank 1 -> 10.0, rank n -> 0.0) to score conversion used for
/// the sentiment stage's LLM-provided ordering.
fn rank_to_score(rank: usize, n: usize) -> f64 {
    if n <= 1 {
        return 10.0;
    }
    10.0 - (rank as f64 - 1.0) / (n as f64 - 1.0) * 10.0
}

pub async fn rank_top_n(
    gateway: &Arc<dyn MarketDataGateway>,
    llm: &LlmClient,
    embedder: &dyn Embedder,
    universe: Vec<FilteredStock>,
    date: NaiveDate,
) -> Result<Vec<RankedStock>> {
    let snapshot = gateway.snapshot(date).await?;
    let joined = join_universe(&snapshot, &universe);
    if joined.is_empty() {
        return Ok(Vec::new());
    }

    // Step 2: momentum via D-1/D-5/D-20 history.
    let mut returns_d1 = Vec::with_capacity(joined.len());
    let mut returns_d5 = Vec::with_capacity(joined.len());
    let mut returns_d20 = Vec::with_capacity(joined.len());
    let mut valid = Vec::with_capacity(joined.len());
    for row in &joined {
        let start = date - chrono::Duration::days(40);
        let bars = gateway.history(&row.ticker, start, date).await.unwrap_or_default();
        if bars.len() < 21 {
            returns_d1.push(0.0);
            returns_d5.push(0.0);
            returns_d20.push(0.0);
            valid.push(false);
            continue;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last = *closes.last().unwrap();
        let d1 = closes[closes.len() - 2];
        let d5 = closes[closes.len() - 6];
        let d20 = closes[closes.len() - 21];
        returns_d1.push((last / d1 - 1.0) * 100.0);
        returns_d5.push((last / d5 - 1.0) * 100.0);
        returns_d20.push((last / d20 - 1.0) * 100.0);
        valid.push(true);
    }
    let momentum = momentum_scores(&returns_d1, &returns_d5, &returns_d20, &valid);

    // Step 3: volume.
    let mut volume_increase_pct = Vec::with_capacity(joined.len());
    let trading_values: Vec<f64> = joined.iter().map(|r| r.snapshot.trading_value).collect();
    for row in &joined {
        let start = date - chrono::Duration::days(30);
        let bars = gateway.history(&row.ticker, start, date).await.unwrap_or_default();
        let avg20 = if bars.len() >= 20 {
            let closes: Vec<f64> = bars.iter().rev().take(20).map(|b| b.volume).collect();
            closes.iter().sum::<f64>() / 20.0
        } else {
            row.snapshot.volume
        };
        volume_increase_pct.push((row.snapshot.volume / avg20.max(1.0) - 1.0) * 100.0);
    }
    let volume = volume_scores(&volume_increase_pct, &trading_values);

    // Step 4: technical, batched.
    let tickers: Vec<Ticker> = joined.iter().map(|r| r.ticker.clone()).collect();
    let technicals_map = gateway.technicals_batch(&tickers, date, 50).await?;
    let technical: Vec<f64> = joined
        .par_iter()
        .map(|r| {
            let t = technicals_map.get(&r.ticker).cloned().unwrap_or_default();
            technical_score(&t)
        })
        .collect();

    // Step 5: base score, take top 50.
    let mut scored: Vec<(usize, f64)> = (0..joined.len())
        .map(|i| (i, 0.40 * momentum[i] + 0.30 * volume[i] + 0.20 * technical[i]))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    scored.truncate(50);

    // Step 6: sentiment via news + LLM ranking.
    let mut sentiment = HashMap::new();
    let mut news_by_ticker = HashMap::new();
    for &(i, _) in &scored {
        let ticker = &joined[i].ticker;
        let news = gateway.news(ticker, 5).await.unwrap_or_default();
        let deduped = crate::analysis::dedup_news(embedder, news, 0.66);
        news_by_ticker.insert(ticker.clone(), deduped);
    }

    if !news_by_ticker.is_empty() {
        let ranking = llm
            .rank_sentiment(&news_by_ticker)
            .await
            .unwrap_or_default();
        let n = scored.len();
        for (rank, ticker) in ranking.iter().enumerate() {
            sentiment.insert(ticker.clone(), rank_to_score(rank + 1, n));
        }
    }

    // Step 7: final blend, top 10.
    let mut results: Vec<RankedStock> = scored
        .into_iter()
        .map(|(i, base)| {
            let row = &joined[i];
            let sentiment_score = *sentiment.get(&row.ticker).unwrap_or(&5.0);
            RankedStock {
                ticker: row.ticker.clone(),
                name: row.name.clone(),
                momentum_score: momentum[i],
                volume_score: volume[i],
                technical_score: technical[i],
                sentiment_score,
                base_score: base,
                final_score: 0.90 * base + 0.10 * sentiment_score,
            }
        })
        .collect();

    results.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
    results.truncate(10);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technical_score_rewards_oversold_golden_cross_above_ma() {
        let t = Technicals {
            rsi: 25.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            macd_status: MacdStatus::GoldenCross,
            sma5: 0.0,
            sma20: 0.0,
            sma60: 0.0,
            ma_position: MaPosition::Above,
        };
        // points = 5 + 5 + 3 = 13 -> rescaled to 10.0
        assert!((technical_score(&t) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn technical_score_penalizes_overbought_dead_cross_below_ma() {
        let t = Technicals {
            rsi: 80.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            macd_status: MacdStatus::DeadCross,
            sma5: 0.0,
            sma20: 0.0,
            sma60: 0.0,
            ma_position: MaPosition::Below,
        };
        // points = -5 - 5 - 3 = -13 -> rescaled to 0.0
        assert!(technical_score(&t).abs() < 1e-9);
    }

    #[test]
    fn rank_to_score_bounds() {
        assert!((rank_to_score(1, 50) - 10.0).abs() < 1e-9);
        assert!((rank_to_score(50, 50)).abs() < 1e-9);
    }
}
