//! Report Engine (C9): LLM-authored morning/afternoon market reports.
//!
//! Both generators enforce at-most-once per (type, date): a pre-check
//! short-circuits to the existing row. On any failure the documented stub
//! is persisted so the cache still advances — spec.md §4.8 "Common".

use crate::gateway::MarketDataGateway;
use crate::llm::{extract_json_block, LlmClient};
use crate::models::{MarketIndex, ReportResult, ReportType, TriggerResult};
use crate::ranker::RankedStock;
use crate::store::Store;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

pub struct ReportEngine {
    store: Arc<Store>,
    gateway: Arc<dyn MarketDataGateway>,
    llm: LlmClient,
    model_name: String,
}

impl ReportEngine {
    pub fn new(store: Arc<Store>, gateway: Arc<dyn MarketDataGateway>, llm: LlmClient, model_name: String) -> Self {
        Self {
            store,
            gateway,
            llm,
            model_name,
        }
    }

    pub async fn generate_morning(&self, date: NaiveDate, top10: &[RankedStock]) -> Result<ReportResult> {
        if let Some(existing) = self.store.report_result(ReportType::Morning, date)? {
            return Ok(existing);
        }

        let payload = self.build_morning_payload(date, top10).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "morning report generation failed, persisting stub");
            stub_morning_payload(top10)
        });

        let result = ReportResult {
            report_type: ReportType::Morning,
            date,
            payload,
            generated_at: Utc::now(),
            model: self.model_name.clone(),
            tokens_used: 0,
        };
        self.store.upsert_report_result(&result)?;
        Ok(result)
    }

    async fn build_morning_payload(&self, date: NaiveDate, top10: &[RankedStock]) -> Result<serde_json::Value> {
        let prev_day = self.gateway.previous_trading_day(date, 10).await?;
        let index = self.gateway.index(prev_day).await?;

        let mut stocks_summary = String::new();
        for s in top10 {
            stocks_summary.push_str(&format!("- {} ({}): final_score={:.2}\n", s.name, s.ticker, s.final_score));
        }

        let prompt = format!(
            "Write a Korean-equities morning market report for {date}.\n\
             Prior-day KOSPI close: {:.2} ({:+.2}%).\n\
             Top 10 candidates:\n{stocks_summary}\n\n\
             Respond with JSON: {{narrative, top_stocks: [{{ticker, name, comment}}]}}.",
            index.kospi_close, index.kospi_change_pct,
        );
        let output = self
            .llm
            .chat_completion("You are a Korean equity markets morning-briefing writer.", &prompt, 2048, 0.3)
            .await?;

        let json_text = extract_json_block(&output.content);
        let mut parsed: serde_json::Value = serde_json::from_str(&json_text)?;

        // Reattach composite scores — the LLM never owns them.
        if let Some(top_stocks) = parsed.get_mut("top_stocks").and_then(|v| v.as_array_mut()) {
            for entry in top_stocks.iter_mut() {
                let ticker = entry.get("ticker").and_then(|v| v.as_str()).map(|s| s.to_string());
                if let Some(ticker) = ticker {
                    if let Some(stock) = top10.iter().find(|s| s.ticker.as_str() == ticker) {
                        entry["composite_score"] = serde_json::json!(stock.final_score);
                    }
                }
            }
        }
        Ok(parsed)
    }

    pub async fn generate_afternoon(
        &self,
        date: NaiveDate,
        afternoon_triggers: &[TriggerResult],
        morning_triggers: &[TriggerResult],
        index: &MarketIndex,
    ) -> Result<ReportResult> {
        if let Some(existing) = self.store.report_result(ReportType::Afternoon, date)? {
            return Ok(existing);
        }

        let triggers = if afternoon_triggers.is_empty() { morning_triggers } else { afternoon_triggers };

        let payload = self
            .build_afternoon_payload(date, triggers, index)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "afternoon report generation failed, persisting stub");
                stub_afternoon_payload()
            });

        let result = ReportResult {
            report_type: ReportType::Afternoon,
            date,
            payload,
            generated_at: Utc::now(),
            model: self.model_name.clone(),
            tokens_used: 0,
        };
        self.store.upsert_report_result(&result)?;
        Ok(result)
    }

    async fn build_afternoon_payload(
        &self,
        date: NaiveDate,
        triggers: &[TriggerResult],
        index: &MarketIndex,
    ) -> Result<serde_json::Value> {
        let mut triggers_summary = String::new();
        for t in triggers.iter().take(20) {
            triggers_summary.push_str(&format!(
                "- {} ({}): {} composite={:.2}\n",
                t.name,
                t.ticker,
                t.trigger_type.as_str(),
                t.composite_score
            ));
        }

        let market_summary = serde_json::json!({
            "kospi_close": index.kospi_close,
            "kospi_change_pct": index.kospi_change_pct,
            "kosdaq_close": index.kosdaq_close,
            "kosdaq_change_pct": index.kosdaq_change_pct,
            "kospi_trading_value_100m": index.kospi_trading_value / 100_000_000,
            "kosdaq_trading_value_100m": index.kosdaq_trading_value / 100_000_000,
            "advancers": index.advancers,
            "decliners": index.decliners,
            "unchanged": index.unchanged,
        });

        let prompt = format!(
            "Write a Korean-equities afternoon close report for {date}.\n\
             Trigger highlights:\n{triggers_summary}\n\n\
             Respond with JSON: {{narrative, highlights}}.",
        );
        let output = self
            .llm
            .chat_completion("You are a Korean equity markets closing-bell writer.", &prompt, 2048, 0.3)
            .await?;

        let json_text = extract_json_block(&output.content);
        let mut parsed: serde_json::Value = serde_json::from_str(&json_text)?;
        if let serde_json::Value::Object(ref mut map) = parsed {
            map.insert("market_summary".to_string(), market_summary);
        }
        Ok(parsed)
    }

    /// `GET /reports/latest`: time-of-day selects which report type.
    /// Returns `None` (→ HTTP 404 at the API layer) rather than guessing
    /// when the expected report is absent — an explicit open question
    /// per spec.md §9 (assumed 404 during the 08:30-15:40 gap).
    pub fn latest(&self, date: NaiveDate, now_hour: u32) -> Result<Option<(ReportType, ReportResult)>> {
        let report_type = if now_hour < 14 { ReportType::Morning } else { ReportType::Afternoon };
        // TODO: the "reports latest" fallback during 08:30-15:40 returns
        // morning which may be absent; returning 404 is assumed here per
        // spec.md's open question rather than silently falling back.
        Ok(self
            .store
            .report_result(report_type, date)?
            .map(|r| (report_type, r)))
    }
}

fn stub_morning_payload(top10: &[RankedStock]) -> serde_json::Value {
    let stocks: Vec<serde_json::Value> = top10
        .iter()
        .map(|s| {
            serde_json::json!({
                "ticker": s.ticker.as_str(),
                "name": s.name,
                "price": 0,
                "comment": "",
                "composite_score": s.final_score,
            })
        })
        .collect();
    serde_json::json!({
        "narrative": "리포트 생성에 실패하여 기본값을 반환합니다.",
        "top_stocks": stocks,
    })
}

fn stub_afternoon_payload() -> serde_json::Value {
    serde_json::json!({
        "narrative": "리포트 생성에 실패하여 기본값을 반환합니다.",
        "highlights": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ticker;

    #[test]
    fn stub_morning_payload_carries_ten_tickers_with_zero_price() {
        let top10: Vec<RankedStock> = (0..10)
            .map(|i| RankedStock {
                ticker: Ticker::try_from(format!("{:06}", i).as_str()).unwrap(),
                name: "Sample".into(),
                momentum_score: 5.0,
                volume_score: 5.0,
                technical_score: 5.0,
                sentiment_score: 5.0,
                base_score: 5.0,
                final_score: 5.0,
            })
            .collect();
        let payload = stub_morning_payload(&top10);
        let stocks = payload["top_stocks"].as_array().unwrap();
        assert_eq!(stocks.len(), 10);
        assert_eq!(stocks[0]["price"], 0);
    }
}
