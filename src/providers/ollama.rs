//! Ollama provider implementation for local inference endpoints.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use super::{truncate_body, GenerationRequest, ModelProvider, ProviderError};

/// Ollama chat API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for a base URL (e.g. `http://127.0.0.1:11434`)
    /// and model name.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut options = json!({});
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }

        // Mode hints become a lightweight system message.
        let mut messages = Vec::new();
        if let Some(mode) = &request.mode {
            messages.push(json!({
                "role": "system",
                "content": format!("Respond in {mode} mode."),
            }));
        }
        messages.push(json!({
            "role": "user",
            "content": request.prompt,
        }));

        json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": options,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate_body(&body, 200),
        })
    }
}

#[async_trait::async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let body = self.request_body(&request, false);

        let response = self
            .client
            .post(self.chat_endpoint())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = parsed
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("response missing message.content".to_owned()))?;

        Ok(content.to_owned())
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<String, ProviderError> {
        let body = self.request_body(&request, true);

        let response = self
            .client
            .post(self.chat_endpoint())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        // Ollama streams newline-delimited JSON objects; each carries a
        // message.content fragment until "done": true.
        let mut full = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed: Value = serde_json::from_str(line)
                    .map_err(|e| ProviderError::Parse(format!("bad stream line: {e}")))?;
                if let Some(fragment) = parsed
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_str)
                {
                    if !fragment.is_empty() {
                        full.push_str(fragment);
                        let _ = tokens.send(fragment.to_owned()).await;
                    }
                }
                if parsed.get("done").and_then(Value::as_bool) == Some(true) {
                    return Ok(full);
                }
            }
        }

        Ok(full)
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
