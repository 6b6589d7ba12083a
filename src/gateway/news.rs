//! News crawling: finance-portal HTML plus a news RSS feed, concatenated
//! with no dedup (dedup is the ranker/analysis engine's job, §4.6/§4.7).
//!
//! Grounded in the teacher's per-vendor `reqwest::Client` pattern
//! (`scrapers::polymarket_gamma`): fixed headers, cookie priming, a single
//! GET against a known page shape. HTML parsing (`scraper`) and RSS parsing
//! (`rss`) are new ambient dependencies this system needs that no pack repo
//! grounds a prior choice for — see DESIGN.md.

use crate::error::{AppError, AppResult};
use crate::models::{NewsItem, Ticker};
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::time::Duration;

const PORTAL_BASE: &str = "https://finance.example-portal.kr";
const RSS_BASE: &str = "https://news.example-portal.kr/rss";

pub async fn fetch_news(http: &reqwest::Client, ticker: &Ticker, days: i64) -> AppResult<Vec<NewsItem>> {
    let cutoff = Utc::now() - chrono::Duration::days(days);

    let mut items = fetch_portal_html(http, ticker).await.unwrap_or_else(|e| {
        tracing::warn!(ticker = %ticker, error = %e, "portal news fetch failed, continuing with RSS only");
        Vec::new()
    });
    items.extend(fetch_rss(http, ticker).await.unwrap_or_else(|e| {
        tracing::warn!(ticker = %ticker, error = %e, "rss news fetch failed, continuing with portal only");
        Vec::new()
    }));

    items.retain(|n| n.published_at >= cutoff);
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    Ok(items)
}

async fn fetch_portal_html(http: &reqwest::Client, ticker: &Ticker) -> AppResult<Vec<NewsItem>> {
    // Cookie priming: hit the stock landing page once before the news tab
    // so the portal's bot-filter sees an established session.
    let landing = format!("{PORTAL_BASE}/item/main.naver?code={}", ticker.as_str());
    http.get(&landing)
        .header(reqwest::header::USER_AGENT, PORTAL_USER_AGENT)
        .header(reqwest::header::ACCEPT_LANGUAGE, "ko-KR,ko;q=0.9")
        .send()
        .await
        .map_err(|e| AppError::transient(format!("portal cookie priming failed: {e}")))?;

    let news_url = format!("{PORTAL_BASE}/item/news.naver?code={}", ticker.as_str());
    let body = http
        .get(&news_url)
        .header(reqwest::header::USER_AGENT, PORTAL_USER_AGENT)
        .header(reqwest::header::ACCEPT_LANGUAGE, "ko-KR,ko;q=0.9")
        .header(reqwest::header::REFERER, &landing)
        .timeout(Duration::from_secs(8))
        .send()
        .await
        .map_err(|e| AppError::transient(format!("portal news request failed: {e}")))?
        .text()
        .await
        .map_err(|e| AppError::transient(format!("portal news body read failed: {e}")))?;

    parse_portal_html(&body, ticker)
}

const PORTAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

fn parse_portal_html(body: &str, ticker: &Ticker) -> AppResult<Vec<NewsItem>> {
    let document = Html::parse_document(body);
    let row_selector = Selector::parse("tr.news_item, .newsList li")
        .map_err(|e| AppError::permanent(format!("selector build failed: {e:?}")))?;
    let title_selector = Selector::parse("a").unwrap();

    let mut items = Vec::new();
    for row in document.select(&row_selector) {
        let Some(title_el) = row.select(&title_selector).next() else {
            continue;
        };
        let title: String = title_el.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        let url = title_el
            .value()
            .attr("href")
            .map(|h| format!("{PORTAL_BASE}{h}"))
            .unwrap_or_default();

        items.push(NewsItem {
            ticker: ticker.clone(),
            title,
            source: "portal".to_string(),
            url,
            published_at: Utc::now(),
        });
    }
    Ok(items)
}

async fn fetch_rss(http: &reqwest::Client, ticker: &Ticker) -> AppResult<Vec<NewsItem>> {
    let url = format!("{RSS_BASE}?query={}", ticker.as_str());
    let body = http
        .get(&url)
        .timeout(Duration::from_secs(8))
        .send()
        .await
        .map_err(|e| AppError::transient(format!("rss request failed: {e}")))?
        .bytes()
        .await
        .map_err(|e| AppError::transient(format!("rss body read failed: {e}")))?;

    let channel = rss::Channel::read_from(&body[..])
        .map_err(|e| AppError::permanent(format!("rss parse failed: {e}")))?;

    let items = channel
        .items()
        .iter()
        .map(|item| NewsItem {
            ticker: ticker.clone(),
            title: item.title().unwrap_or_default().to_string(),
            source: "rss".to_string(),
            url: item.link().unwrap_or_default().to_string(),
            published_at: item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
        .collect();
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_portal_html_extracts_titles() {
        let html = r#"
            <table>
                <tr class="news_item"><td><a href="/news/1">First headline</a></td></tr>
                <tr class="news_item"><td><a href="/news/2">Second headline</a></td></tr>
            </table>
        "#;
        let ticker = Ticker::try_from("005930").unwrap();
        let items = parse_portal_html(html, &ticker).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First headline");
    }

    #[test]
    fn parse_portal_html_skips_empty_titles() {
        let html = r#"<table><tr class="news_item"><td><a href="/news/1"></a></td></tr></table>"#;
        let ticker = Ticker::try_from("005930").unwrap();
        let items = parse_portal_html(html, &ticker).unwrap();
        assert!(items.is_empty());
    }
}
