//! LLM capability: one chat-completion client shared by the analysis
//! engine (C8) and the report engine (C9), plus the Top-N ranker's
//! sentiment-ranking call.
//!
//! Structurally a generalization of the teacher's `OpenRouterClient`
//! (`vault/llm.rs`): same request/response shape, same latency-timed
//! `LlmCallOutput`, with a token-bucket rate limiter and backoff retry
//! layered on top since this system drives far more call sites.

pub mod embedder;

pub use embedder::{Embedder, IdentityEmbedder};

use crate::error::{AppError, AppResult};
use crate::gateway::retry::{retry_with_backoff, BackoffConfig};
use crate::models::{NewsItem, Ticker};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

/// Token-bucket limiter: at most 60 calls in any trailing 60s window.
struct RateLimiter {
    window: Duration,
    max_calls: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            window,
            max_calls,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut ts = self.timestamps.lock();
                let now = Instant::now();
                while ts.front().is_some_and(|t| now.duration_since(*t) > self.window) {
                    ts.pop_front();
                }
                if ts.len() < self.max_calls {
                    ts.push_back(now);
                    None
                } else {
                    let oldest = *ts.front().unwrap();
                    Some(self.window - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    limiter: std::sync::Arc<RateLimiter>,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            limiter: std::sync::Arc::new(RateLimiter::new(60, Duration::from_secs(60))),
        }
    }

    fn is_transient(err: &anyhow::Error) -> bool {
        let msg = err.to_string().to_lowercase();
        msg.contains("429") || msg.contains("503") || msg.contains("overloaded") || msg.contains("timeout")
    }

    pub async fn chat_completion(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> AppResult<LlmCallOutput> {
        self.limiter.acquire().await;
        retry_with_backoff(
            "llm_chat_completion",
            BackoffConfig {
                max_attempts: 5,
                ..BackoffConfig::default()
            },
            Self::is_transient,
            || self.chat_completion_once(system, user, max_tokens, temperature),
        )
        .await
        .map_err(|e| AppError::transient(e.to_string()))
    }

    async fn chat_completion_once(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<LlmCallOutput> {
        let start = Instant::now();
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        let resp = self
            .http
            .post("https://generativelanguage.googleapis.com/v1beta/chat/completions")
            .timeout(Duration::from_secs(60))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .context("llm request")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("llm {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).context("llm json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(LlmCallOutput {
            content,
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Asks the model to rank all tickers by sentiment, once, using up to
    /// 20 titles per ticker. Returns tickers ordered best-to-worst.
    pub async fn rank_sentiment(&self, news_by_ticker: &HashMap<Ticker, Vec<NewsItem>>) -> AppResult<Vec<Ticker>> {
        let mut prompt = String::from(
            "Rank the following stocks from most positive to most negative recent news sentiment. \
             Respond with a JSON array of tickers only, best first.\n\n",
        );
        for (ticker, items) in news_by_ticker {
            prompt.push_str(&format!("## {}\n", ticker.as_str()));
            for item in items.iter().take(20) {
                prompt.push_str(&format!("- {}\n", item.title));
            }
        }

        let output = self
            .chat_completion(
                "You are a financial news sentiment ranking assistant.",
                &prompt,
                2048,
                0.0,
            )
            .await?;

        let json_text = extract_json_block(&output.content);
        let tickers: Vec<String> = serde_json::from_str(&json_text)
            .map_err(|e| AppError::permanent(format!("sentiment ranking response malformed: {e}")))?;

        Ok(tickers.into_iter().filter_map(|t| Ticker::try_from(t.as_str()).ok()).collect())
    }
}

/// Extracts the JSON payload from an optional fenced code block (```json
/// ... ``` or plain ```), falling back to the raw text.
pub fn extract_json_block(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let after_lang = after_fence.strip_prefix("json").unwrap_or(after_fence);
        if let Some(end) = after_lang.find("```") {
            return after_lang[..end].trim().to_string();
        }
    }
    text.trim().to_string()
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }

    #[test]
    fn falls_back_to_raw_text_without_fence() {
        let text = "  {\"a\": 1}  ";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }
}
