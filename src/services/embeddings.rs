//! Embedding pipeline: translate, embed, normalize, persist.
//!
//! The pending set (movies with a description and no embedding row) is
//! re-read from scratch on every run, so a per-item failure needs no
//! bookkeeping — the item is simply still pending next time. The fan-out to
//! the model service is the one concurrent part of the system, gated by a
//! counting semaphore.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::services::providers::LanguageModel;

/// Descriptions are normalized to one language before embedding so queries
/// and corpus share an embedding space.
pub const TRANSLATION_PROMPT: &str = "Translate the following text into English:";

/// Scale a vector to unit L2 norm. Zero vectors pass through unchanged.
pub fn normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

pub struct EmbeddingPipeline {
    model: Arc<dyn LanguageModel>,
    store: Store,
    max_concurrent: usize,
}

impl EmbeddingPipeline {
    pub fn new(model: Arc<dyn LanguageModel>, store: Store, max_concurrent: usize) -> Self {
        Self {
            model,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Translate and embed every pending movie, persisting successful
    /// vectors one-by-one after the concurrent phase. Returns how many
    /// embeddings were stored; failed items stay pending.
    pub async fn process_pending(&self) -> AppResult<usize> {
        let pending = self.store.call(|s| s.movies_without_embedding()).await?;
        if pending.is_empty() {
            info!("no movies pending embedding");
            return Ok(0);
        }
        info!(pending = pending.len(), "embedding pass started");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::with_capacity(pending.len());
        for movie in pending {
            let model = self.model.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                let translation = model.chat(TRANSLATION_PROMPT, &movie.description).await?;
                let embedding = model.embed(&translation).await?;
                Ok::<(i64, Vec<f32>), AppError>((movie.id, normalize(embedding)))
            }));
        }

        let mut stored = 0;
        for task in futures::future::join_all(tasks).await {
            match task {
                Ok(Ok((movie_id, embedding))) => {
                    self.store
                        .call(move |s| s.add_embedding(movie_id, &embedding))
                        .await?;
                    stored += 1;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "translate+embed failed, movie stays pending");
                }
                Err(e) => {
                    error!(error = %e, "embedding task join error");
                }
            }
        }

        info!(stored, "embedding pass complete");
        Ok(stored)
    }
}
