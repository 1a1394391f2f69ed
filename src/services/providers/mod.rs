//! External capability abstractions consumed by the core pipelines.
//!
//! `PageSession` is the browser-session capability the crawler drives;
//! `LanguageModel` is the text-model service the embedding pipeline and the
//! recommendation engine call. Both are traits so tests can substitute
//! deterministic fakes and failures.

use std::time::Duration;

use crate::error::AppResult;

pub mod http_session;
pub mod ollama;

pub use http_session::HttpSession;
pub use ollama::OllamaClient;

/// Browser-session capability: navigate, wait for page structure with a
/// bounded timeout, read the current page. `recycle` replaces the underlying
/// session after a hard failure so the crawl can continue with the next date.
#[async_trait::async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str) -> AppResult<()>;

    /// Resolve once `selector` is present in the page, or fail with a
    /// timeout error after `timeout`. A timeout is a soft failure.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> AppResult<()>;

    /// Current page content as HTML text.
    async fn content(&self) -> AppResult<String>;

    /// Tear down and recreate the session state.
    async fn recycle(&mut self) -> AppResult<()>;
}

/// Text-model service: chat completion (used for translation) and text
/// embedding.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> AppResult<String>;

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}
