use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tokio::time::Instant;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(page_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("es-ES,es;q=0.9,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(page_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {status} for {url}");
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read body: {url}"))?;
        debug!(url, bytes = body.len(), "fetched page");

        Ok(body)
    }
}

pub(crate) async fn fetch_with_timeout(
    fetcher: &dyn PageFetcher,
    url: &str,
    page_timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(page_timeout, fetcher.fetch(url)).await {
        Ok(result) => result,
        Err(_) => bail!("timed out after {}ms waiting for {url}", page_timeout.as_millis()),
    }
}

pub(crate) fn page_budget(page_timeout: Duration, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(page_timeout))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::PageFetcher;

    pub(crate) fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[derive(Debug, Default, Clone)]
    pub(crate) struct MapFetcher {
        pages: HashMap<String, String>,
        slow: HashMap<String, Duration>,
    }

    impl MapFetcher {
        pub(crate) fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(url.to_string(), html.into());
            self
        }

        pub(crate) fn with_delay(mut self, url: &str, delay: Duration) -> Self {
            self.slow.insert(url.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            if let Some(delay) = self.slow.get(url) {
                tokio::time::sleep(*delay).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("connection refused: {url}"))
        }
    }
}
