// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local AI inference

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ClassifierError, CuratorError, Result};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ClassifierError::Unavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if a specific model is available
    pub async fn model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m.starts_with(model) || m == &format!("{}:latest", model)
        }))
    }

    /// Generate a JSON-formatted completion
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            format: "json",
        };

        debug!("Sending request to Ollama: model={}", model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout
                } else {
                    ClassifierError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body).into());
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        Ok(result.response)
    }

    /// Generate with retry logic; only transient failures are retried
    pub async fn generate_with_retry(
        &self,
        model: &str,
        prompt: &str,
        retries: u32,
    ) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!("Retrying Ollama request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.generate(model, prompt).await {
                Ok(response) => return Ok(response),
                Err(CuratorError::Classifier(e)) if e.is_transient() => {
                    last_error = Some(CuratorError::Classifier(e));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ClassifierError::Unavailable("Unknown error".to_string()).into()
        }))
    }
}

/// Map a non-success HTTP status to a classifier failure
fn status_error(status: StatusCode, body: &str) -> ClassifierError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ClassifierError::RateLimited;
    }
    if status == StatusCode::PAYMENT_REQUIRED
        || status == StatusCode::FORBIDDEN
        || body.to_lowercase().contains("quota")
    {
        return ClassifierError::QuotaExceeded;
    }
    ClassifierError::Unavailable(format!("Ollama returned status {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalization() {
        let client = OllamaClient::new("http://localhost:11434/api/generate/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), ClassifierError::RateLimited);
        assert_eq!(status_error(StatusCode::PAYMENT_REQUIRED, ""), ClassifierError::QuotaExceeded);
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, "monthly quota reached"),
            ClassifierError::QuotaExceeded
        );
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            ClassifierError::Unavailable(_)
        ));
    }
}
