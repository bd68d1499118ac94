use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Turns a page URL into the text the answerer reads.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn scrape(&self, url: &str) -> std::result::Result<String, ScrapeError>;
}

/// Fetches pages through a reader proxy that takes the target URL as its path.
pub struct ProxyScraper {
    client: Client,
    proxy_base: Url,
    user_agent: String,
    max_chars: usize,
}

impl ProxyScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let proxy_base = Url::parse(&config.proxy_base)
            .with_context(|| format!("Invalid scraper proxy base: {}", config.proxy_base))?;

        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .with_context(|| format!("Failed to build HTTP client for {}", proxy_base))?;

        Ok(Self {
            client,
            proxy_base,
            user_agent: config.user_agent.clone(),
            max_chars: config.max_content_chars,
        })
    }
}

#[async_trait]
impl ContentSource for ProxyScraper {
    async fn scrape(&self, url: &str) -> std::result::Result<String, ScrapeError> {
        let request_url = build_proxy_url(&self.proxy_base, url)?;
        tracing::debug!("Scraping {} via {}", url, request_url);

        let response = self
            .client
            .get(request_url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Transport(e.to_string()))?;

        let content = truncate_chars(&body, self.max_chars);
        tracing::debug!(
            "Scraped {} chars from {} (page had {} bytes)",
            content.chars().count(),
            url,
            body.len()
        );
        Ok(content)
    }
}

/// Places the canonical form of `target` inside the proxy's path.
///
/// `?` and `#` from the target end up percent-encoded in the path, so the
/// proxy request never gains a query or fragment of its own.
pub fn build_proxy_url(base: &Url, target: &str) -> std::result::Result<Url, ScrapeError> {
    let invalid = |reason: String| ScrapeError::InvalidUrl {
        url: target.to_string(),
        reason,
    };

    let mut canonical = Url::parse(target.trim()).map_err(|e| invalid(e.to_string()))?;
    match canonical.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    canonical.set_fragment(None);

    let mut proxied = base.clone();
    let prefix = base.path().trim_end_matches('/');
    proxied.set_path(&format!("{}/{}", prefix, canonical.as_str()));
    proxied.set_query(None);
    proxied.set_fragment(None);
    Ok(proxied)
}

/// Keeps the first `max_chars` characters, possibly cutting mid-word.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
