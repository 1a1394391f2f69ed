//! Ollama-compatible model service client.
//!
//! Speaks the plain HTTP API: `/api/chat` for translation and
//! `/api/embeddings` for vectors. Any non-success status or malformed
//! payload surfaces as an `ExternalModel` error, which callers treat as a
//! soft per-item failure.

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::services::providers::LanguageModel;

#[derive(Clone)]
pub struct OllamaClient {
    http_client: HttpClient,
    base_url: String,
    chat_model: String,
    embed_model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    pub fn new(base_url: String, chat_model: String, embed_model: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model,
            embed_model,
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalModel(format!(
                "model service returned status {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::ExternalModel(format!("malformed model response: {}", e)))
    }
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> AppResult<String> {
        let messages = [
            ChatMessage {
                role: "system",
                content: system_prompt,
            },
            ChatMessage {
                role: "user",
                content: user_text,
            },
        ];
        let response: ChatResponse = self
            .post_json(
                "/api/chat",
                json!({
                    "model": self.chat_model,
                    "messages": messages,
                    "stream": false,
                }),
            )
            .await?;
        Ok(response.message.content.trim().to_string())
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let response: EmbeddingsResponse = self
            .post_json(
                "/api/embeddings",
                json!({
                    "model": self.embed_model,
                    "prompt": text,
                }),
            )
            .await?;
        if response.embedding.is_empty() {
            return Err(AppError::ExternalModel(
                "model returned an empty embedding".to_string(),
            ));
        }
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OllamaClient::new(
            "http://localhost:11434/".to_string(),
            "llama3.2".to_string(),
            "mxbai-embed-large".to_string(),
        );
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_chat_response_deserialization() {
        let json = r#"{
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "A quiet drama.\n"},
            "done": true
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.message.content, "A quiet drama.\n");
    }

    #[test]
    fn test_embeddings_response_deserialization() {
        let json = r#"{"embedding": [0.25, -0.5, 0.125]}"#;
        let response: EmbeddingsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.embedding, vec![0.25, -0.5, 0.125]);
    }
}
