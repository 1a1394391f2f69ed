//! "Movies like this" lookups.

use std::sync::Arc;

use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::MovieWithScreenings;
use crate::services::embeddings::normalize;
use crate::services::providers::LanguageModel;

/// Embed the raw query text (no translation — the embedding model handles
/// the query as-is), normalize it, and return the `k` nearest movies by
/// ascending distance. Fewer results come back when the corpus is smaller.
pub async fn find_similar(
    model: Arc<dyn LanguageModel>,
    store: &Store,
    description: &str,
    k: usize,
) -> AppResult<Vec<MovieWithScreenings>> {
    if description.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "query description cannot be empty".to_string(),
        ));
    }
    if k == 0 {
        return Err(AppError::InvalidInput(
            "result count must be at least 1".to_string(),
        ));
    }

    let embedding = normalize(model.embed(description).await?);
    store.call(move |s| s.find_similar(&embedding, k)).await
}
