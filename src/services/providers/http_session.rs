//! HTTP-backed page session.
//!
//! Keeps one cookie-carrying `reqwest` client per session and re-fetches the
//! current URL while polling for the expected selector, which tolerates
//! pages that fill in content shortly after first load. The whole crawl
//! shares a single session so the target site sees one ordinary visitor.

use std::time::Duration;

use reqwest::{header, Client};
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::services::providers::PageSession;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/143.0.0.0 Safari/537.36";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct HttpSession {
    client: Client,
    current_url: Option<String>,
    body: Option<String>,
}

impl HttpSession {
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            client: build_client()?,
            current_url: None,
            body: None,
        })
    }

    async fn fetch(&self, url: &str) -> AppResult<String> {
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

fn build_client() -> AppResult<Client> {
    Ok(Client::builder().cookie_store(true).build()?)
}

/// Sync check so no non-Send parser state lives across an await point.
fn has_selector(html: &str, selector: &str) -> AppResult<bool> {
    let sel = Selector::parse(selector)
        .map_err(|e| AppError::Parse(format!("bad selector '{}': {}", selector, e)))?;
    let document = Html::parse_document(html);
    Ok(document.select(&sel).next().is_some())
}

#[async_trait::async_trait]
impl PageSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> AppResult<()> {
        debug!(url = %url, "navigating");
        let body = self.fetch(url).await?;
        self.current_url = Some(url.to_string());
        self.body = Some(body);
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> AppResult<()> {
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| AppError::Internal("wait_for_selector before navigate".to_string()))?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let found = match &self.body {
                Some(body) => has_selector(body, selector)?,
                None => false,
            };
            if found {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Timeout {
                    url,
                    selector: selector.to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            // the page may fill in after first load; take a fresh snapshot
            self.body = Some(self.fetch(&url).await?);
        }
    }

    async fn content(&self) -> AppResult<String> {
        self.body
            .clone()
            .ok_or_else(|| AppError::Internal("content before navigate".to_string()))
    }

    async fn recycle(&mut self) -> AppResult<()> {
        debug!("recycling http session");
        self.client = build_client()?;
        self.current_url = None;
        self.body = None;
        Ok(())
    }
}
