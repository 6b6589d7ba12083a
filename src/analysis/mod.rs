//! Analysis Engine (C8): cached two-stage company analysis — three
//! deterministic pre-computation steps followed by one LLM refinement
//! call.
//!
//! Formulas ported verbatim from `_calculate_base_valuation` /
//! `_calculate_technical_adjustment` / `_analyze_news_sentiment` in the
//! original Python service.

use crate::gateway::MarketDataGateway;
use crate::llm::{extract_json_block, Embedder, LlmClient};
use crate::models::{AnalysisResult, MacdStatus, MaPosition, NewsItem, Technicals, Ticker};
use crate::store::Store;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AnalysisEngine {
    store: Arc<Store>,
    gateway: Arc<dyn MarketDataGateway>,
    llm: LlmClient,
    embedder: Arc<dyn Embedder>,
    model_name: String,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MarketDataGateway>,
        llm: LlmClient,
        embedder: Arc<dyn Embedder>,
        model_name: String,
    ) -> Self {
        Self {
            store,
            gateway,
            llm,
            embedder,
            model_name,
        }
    }

    /// Cache law: `(ticker, today)` short-circuits unless `force_refresh`
    /// or the row is absent.
    pub async fn get_analysis(&self, ticker: &Ticker, force_refresh: bool) -> Result<AnalysisResult> {
        let today = Utc::now().date_naive();
        if !force_refresh {
            if let Some(cached) = self.store.analysis_result(ticker, today)? {
                return Ok(cached);
            }
        }
        self.generate(ticker, today).await
    }

    async fn generate(&self, ticker: &Ticker, date: NaiveDate) -> Result<AnalysisResult> {
        let fundamentals = self.gateway.fundamentals(ticker).await?;
        let quote = self.gateway.realtime_one(ticker).await?;
        let technicals = self.gateway.technicals(ticker, date).await?;
        let news = self.gateway.news(ticker, 5).await.unwrap_or_default();

        let current_price = quote.current as f64;
        let base_target = base_valuation(
            current_price,
            fundamentals.per,
            fundamentals.pbr,
            fundamentals.eps,
            fundamentals.bps,
            fundamentals.revenue_growth_yoy,
            fundamentals.roe,
        );
        let step2 = technical_adjustment(&technicals);
        let deduped_news = dedup_news(self.embedder.as_ref(), news, 0.66);
        let step3 = self.news_sentiment_adjustment(&deduped_news).await;

        let combined = (step2 + step3).clamp(-0.25, 0.25);
        let preliminary_target = base_target * (1.0 + combined);

        let payload = self.finalize_with_llm(ticker, current_price, preliminary_target, step2, step3).await;

        let payload = payload.unwrap_or_else(|_| stub_payload(preliminary_target));

        let result = AnalysisResult {
            ticker: ticker.clone(),
            date,
            payload,
            generated_at: Utc::now(),
            model: self.model_name.clone(),
            tokens_used: 0,
        };
        self.store.upsert_analysis_result(&result)?;
        Ok(result)
    }

    async fn finalize_with_llm(
        &self,
        ticker: &Ticker,
        current_price: f64,
        preliminary_target: f64,
        step2: f64,
        step3: f64,
    ) -> Result<serde_json::Value> {
        let prompt = format!(
            "Ticker: {}\nCurrent price: {:.0}\nPreliminary target: {:.0}\n\
             Technical adjustment: {:+.2}%\nSentiment adjustment: {:+.2}%\n\n\
             Respond with JSON: {{summary, opinion, target_price, stop_loss_price, key_points, \
             financial_analysis, industry_analysis, news_analysis, technical_analysis, risks, \
             investment_strategy}}.",
            ticker.as_str(),
            current_price,
            preliminary_target,
            step2 * 100.0,
            step3 * 100.0,
        );
        let output = self
            .llm
            .chat_completion(
                "You are an equity research assistant producing structured JSON analysis.",
                &prompt,
                2048,
                0.3,
            )
            .await?;

        let json_text = extract_json_block(&output.content);
        let raw: RawAnalysisJson = serde_json::from_str(&json_text)?;
        let canonical = raw.canonicalize();
        Ok(serde_json::to_value(canonical)?)
    }

    /// Step 3 — classifies each deduped headline into {+, -, 0} via one
    /// LLM call and converts the counts into the clamped adjustment.
    /// Falls back to a neutral 0.0 adjustment if the call or parse fails,
    /// per spec.md §7's `Permanent` handling (logged, default returned).
    async fn news_sentiment_adjustment(&self, news: &[NewsItem]) -> f64 {
        if news.is_empty() {
            return 0.0;
        }
        match self.classify_sentiment(news).await {
            Ok((positive, negative)) => news_sentiment_adjustment_from_counts(positive, negative),
            Err(e) => {
                tracing::warn!(error = %e, "news sentiment classification failed, using neutral adjustment");
                0.0
            }
        }
    }

    async fn classify_sentiment(&self, news: &[NewsItem]) -> Result<(i64, i64)> {
        let mut prompt = String::from(
            "Classify each headline as +, -, or 0 for stock-price sentiment. \
             Respond with JSON: {\"positive\": <count>, \"negative\": <count>}.\n\n",
        );
        for item in news {
            prompt.push_str(&format!("- {}\n", item.title));
        }
        let output = self
            .llm
            .chat_completion("You are a financial news sentiment classifier.", &prompt, 512, 0.0)
            .await?;
        let json_text = extract_json_block(&output.content);

        #[derive(Deserialize)]
        struct Counts {
            positive: i64,
            negative: i64,
        }
        let counts: Counts = serde_json::from_str(&json_text)?;
        Ok((counts.positive, counts.negative))
    }
}

/// Step 1 — base valuation. g/r bucketed by YoY growth and ROE; target =
/// mean of the positive per/pbr targets, or current_price if neither is
/// positive.
pub fn base_valuation(current_price: f64, per: f64, pbr: f64, eps: f64, bps: f64, yoy_growth: f64, roe: f64) -> f64 {
    let g = if yoy_growth >= 20.0 {
        1.2
    } else if yoy_growth >= 10.0 {
        1.1
    } else if yoy_growth >= 0.0 {
        1.05
    } else {
        0.95
    };
    let r = if roe >= 15.0 {
        1.2
    } else if roe >= 10.0 {
        1.1
    } else if roe >= 5.0 {
        1.0
    } else {
        0.9
    };

    let eps = if per != 0.0 { current_price / per } else { eps };
    let per_target = if per > 0.0 { eps * per * g } else { 0.0 };
    let pbr_target = if pbr > 0.0 { bps * pbr * r } else { 0.0 };

    let targets: Vec<f64> = [per_target, pbr_target].into_iter().filter(|t| *t > 0.0).collect();
    if targets.is_empty() {
        current_price
    } else {
        targets.iter().sum::<f64>() / targets.len() as f64
    }
}

/// Step 2 — technical adjustment in [-10%, +10%]: RSI +/-5%, MACD +/-5%,
/// MA +/-3%, summed then clamped.
pub fn technical_adjustment(t: &Technicals) -> f64 {
    let mut adj: f64 = 0.0;
    if t.rsi < 30.0 {
        adj += 0.05;
    } else if t.rsi > 70.0 {
        adj -= 0.05;
    }
    adj += match t.macd_status {
        MacdStatus::GoldenCross => 0.05,
        MacdStatus::DeadCross => -0.05,
        MacdStatus::Neutral => 0.0,
    };
    adj += match t.ma_position {
        MaPosition::Above => 0.03,
        MaPosition::Below => -0.03,
        MaPosition::Neutral => 0.0,
    };
    adj.clamp(-0.10, 0.10)
}

/// Dedup a news list at `threshold` cosine similarity, keeping the first
/// occurrence of each near-duplicate cluster, clipped to 100 items.
pub fn dedup_news(embedder: &dyn Embedder, news: Vec<NewsItem>, threshold: f32) -> Vec<NewsItem> {
    let mut kept: Vec<(NewsItem, Vec<f32>)> = Vec::new();
    for item in news {
        let embedding = embedder.embed(&item.title);
        let is_dup = kept
            .iter()
            .any(|(_, e)| crate::llm::embedder::cosine_similarity(&embedding, e) >= threshold);
        if !is_dup {
            kept.push((item, embedding));
        }
        if kept.len() >= 100 {
            break;
        }
    }
    kept.into_iter().map(|(item, _)| item).collect()
}

/// Step 3 — news sentiment adjustment in [-5%, +5%]: classification
/// counts are approximated here by keyword-free neutral-zero placeholder;
/// the real classification is the LLM-finalize prompt's job per spec.md.
/// This pure function exists to document/test the clamp law independent
/// of the LLM call.
pub fn news_sentiment_adjustment_from_counts(positive: i64, negative: i64) -> f64 {
    (0.0005 * (positive - negative) as f64).clamp(-0.05, 0.05)
}

pub fn check_analysis_trigger(change_rate: f64) -> bool {
    change_rate.abs() >= 10.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ObjOrString<T> {
    Obj(T),
    Str(String),
}

#[derive(Debug, Deserialize, Default)]
struct FinancialAnalysis {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct RawAnalysisJson {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    opinion: String,
    #[serde(default)]
    target_price: f64,
    #[serde(default)]
    stop_loss_price: f64,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    financial_analysis: Option<ObjOrString<FinancialAnalysis>>,
    #[serde(default)]
    industry_analysis: Option<ObjOrString<FinancialAnalysis>>,
    #[serde(default)]
    news_analysis: Option<ObjOrString<FinancialAnalysis>>,
    #[serde(default)]
    technical_analysis: Option<ObjOrString<FinancialAnalysis>>,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    investment_strategy: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisPayload {
    pub summary: String,
    pub opinion: String,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub key_points: Vec<String>,
    pub financial_analysis: String,
    pub industry_analysis: String,
    pub news_analysis: String,
    pub technical_analysis: String,
    pub risks: Vec<String>,
    pub investment_strategy: String,
}

const VALID_OPINIONS: [&str; 5] = ["STRONG_BUY", "BUY", "HOLD", "SELL", "STRONG_SELL"];

fn canonicalize_sub(value: Option<ObjOrString<FinancialAnalysis>>) -> String {
    match value {
        Some(ObjOrString::Obj(o)) => o.summary,
        Some(ObjOrString::Str(s)) => s,
        None => String::new(),
    }
}

impl RawAnalysisJson {
    fn canonicalize(self) -> AnalysisPayload {
        let opinion = if VALID_OPINIONS.contains(&self.opinion.as_str()) {
            self.opinion
        } else {
            "HOLD".to_string()
        };
        let mut risks = self.risks;
        while risks.len() < 3 {
            risks.push("추가 리스크 정보 없음".to_string());
        }
        AnalysisPayload {
            summary: self.summary,
            opinion,
            target_price: self.target_price,
            stop_loss_price: self.stop_loss_price,
            key_points: self.key_points,
            financial_analysis: canonicalize_sub(self.financial_analysis),
            industry_analysis: canonicalize_sub(self.industry_analysis),
            news_analysis: canonicalize_sub(self.news_analysis),
            technical_analysis: canonicalize_sub(self.technical_analysis),
            risks,
            investment_strategy: self.investment_strategy,
        }
    }
}

fn stub_payload(preliminary_target: f64) -> serde_json::Value {
    serde_json::json!({
        "summary": "분석 생성에 실패하여 기본값을 반환합니다.",
        "opinion": "HOLD",
        "target_price": preliminary_target,
        "stop_loss_price": preliminary_target * 0.9,
        "key_points": [],
        "financial_analysis": "",
        "industry_analysis": "",
        "news_analysis": "",
        "technical_analysis": "",
        "risks": ["분석 실패", "데이터 부족", "LLM 응답 오류"],
        "investment_strategy": "",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::IdentityEmbedder;

    #[test]
    fn base_valuation_averages_positive_targets() {
        let target = base_valuation(10_000.0, 10.0, 1.0, 1000.0, 10_000.0, 25.0, 20.0);
        assert!(target > 0.0);
    }

    #[test]
    fn base_valuation_falls_back_to_current_price() {
        let target = base_valuation(10_000.0, 0.0, 0.0, 1000.0, 10_000.0, 5.0, 5.0);
        assert_eq!(target, 10_000.0);
    }

    #[test]
    fn technical_adjustment_clamps_to_ten_percent() {
        let t = Technicals {
            rsi: 20.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            macd_status: MacdStatus::GoldenCross,
            sma5: 0.0,
            sma20: 0.0,
            sma60: 0.0,
            ma_position: MaPosition::Above,
        };
        assert!((technical_adjustment(&t) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn sentiment_adjustment_clamps_to_five_percent() {
        assert!((news_sentiment_adjustment_from_counts(1000, 0) - 0.05).abs() < 1e-9);
        assert!((news_sentiment_adjustment_from_counts(0, 1000) + 0.05).abs() < 1e-9);
    }

    #[test]
    fn check_analysis_trigger_fires_at_ten_percent() {
        assert!(check_analysis_trigger(10.0));
        assert!(check_analysis_trigger(-10.5));
        assert!(!check_analysis_trigger(5.0));
    }

    #[test]
    fn dedup_news_with_identity_embedder_keeps_everything_up_to_cap() {
        let embedder = IdentityEmbedder;
        let news: Vec<NewsItem> = (0..150)
            .map(|i| NewsItem {
                ticker: Ticker::try_from("005930").unwrap(),
                title: format!("headline {i}"),
                source: "test".into(),
                url: String::new(),
                published_at: Utc::now(),
            })
            .collect();
        let deduped = dedup_news(&embedder, news, 0.66);
        assert_eq!(deduped.len(), 100);
    }

    #[test]
    fn raw_analysis_json_coerces_bad_opinion_and_pads_risks() {
        let raw = RawAnalysisJson {
            summary: "s".into(),
            opinion: "MAYBE".into(),
            target_price: 1.0,
            stop_loss_price: 1.0,
            key_points: vec![],
            financial_analysis: Some(ObjOrString::Str("fin".into())),
            industry_analysis: None,
            news_analysis: None,
            technical_analysis: None,
            risks: vec!["only one".into()],
            investment_strategy: String::new(),
        };
        let canonical = raw.canonicalize();
        assert_eq!(canonical.opinion, "HOLD");
        assert_eq!(canonical.financial_analysis, "fin");
        assert!(canonical.risks.len() >= 3);
    }
}
