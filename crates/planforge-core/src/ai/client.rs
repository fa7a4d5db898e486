//! OpenAI-compatible streaming transport
//!
//! Opens a streaming chat-completion request and feeds parsed chunks to the
//! stream reader through an unbounded channel. SSE framing handles partial
//! lines across network chunks; `[DONE]` closes the stream.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ai::stream::{BuilderModel, ChunkStream};
use crate::ai::types::{ChatRequest, CompletionChunk};
use crate::config::ModelClientConfig;
use crate::constants;

/// Streaming model client for OpenAI-compatible chat-completion APIs
pub struct ModelClient {
    http: Client,
    config: ModelClientConfig,
}

impl ModelClient {
    /// Create the HTTP client with configuration suited to SSE streaming
    fn create_http_client() -> Client {
        Client::builder()
            .user_agent("Planforge/1.0")
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(constants::http::STREAM_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            })
    }

    pub fn new(config: ModelClientConfig) -> Self {
        Self {
            http: Self::create_http_client(),
            config,
        }
    }
}

#[async_trait]
impl BuilderModel for ModelClient {
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChunkStream> {
        let url = self.config.completions_url();
        debug!("Calling builder model {} with streaming", req.model);

        let body = serde_json::to_value(&req)?;
        let body = with_stream_flag(body);

        let response = self
            .http
            .post(&url)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("API error response: {} - {}", status, error_text);
            return Err(anyhow!("API error: {} - {}", status, error_text));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        info!("Starting builder stream processing task");
        let stream = response.bytes_stream();
        tokio::spawn(async move {
            tokio::pin!(stream);
            let mut framer = SseFramer::new();
            let mut chunk_count = 0;
            while let Some(chunk) = stream.next().await {
                chunk_count += 1;
                match chunk {
                    Ok(bytes) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for data in framer.push(&text) {
                            if data == SSE_DONE {
                                info!("Builder stream [DONE] after {} chunks", chunk_count);
                                return;
                            }
                            match serde_json::from_str::<CompletionChunk>(&data) {
                                Ok(parsed) => {
                                    if tx.send(Ok(parsed)).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse SSE JSON: {} ({})", data, e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Stream read error at chunk #{}: {}", chunk_count, e);
                        let _ = tx.send(Err(e.into()));
                        return;
                    }
                }
            }
            debug!("Builder stream ended after {} chunks", chunk_count);
        });

        Ok(rx)
    }
}

fn with_stream_flag(mut body: serde_json::Value) -> serde_json::Value {
    body["stream"] = serde_json::Value::Bool(true);
    body
}

const SSE_DONE: &str = "[DONE]";

/// SSE line framer carrying partial lines across network chunks
struct SseFramer {
    partial_line: String,
}

impl SseFramer {
    fn new() -> Self {
        Self {
            partial_line: String::new(),
        }
    }

    /// Feed one network chunk; returns the complete `data:` payloads it closed
    fn push(&mut self, text: &str) -> Vec<String> {
        let combined = if self.partial_line.is_empty() {
            text.to_string()
        } else {
            let mut combined = std::mem::take(&mut self.partial_line);
            combined.push_str(text);
            combined
        };

        let has_trailing_newline = combined.ends_with('\n');
        let mut payloads = Vec::new();
        let mut lines = combined.lines().peekable();

        while let Some(line) = lines.next() {
            if lines.peek().is_none() && !has_trailing_newline {
                self.partial_line = line.to_string();
                break;
            }

            // Skip blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data: ") {
                payloads.push(data.to_string());
            }
        }

        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_complete_event() {
        let mut framer = SseFramer::new();
        let payloads = framer.push("data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_framer_partial_line_carries_over() {
        let mut framer = SseFramer::new();
        assert!(framer.push("data: {\"a\"").is_empty());
        let payloads = framer.push(":1}\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_framer_skips_comments_and_blanks() {
        let mut framer = SseFramer::new();
        let payloads = framer.push(": keepalive\n\ndata: x\n");
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn test_framer_multiple_events_one_chunk() {
        let mut framer = SseFramer::new();
        let payloads = framer.push("data: 1\ndata: 2\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["1", "2", "[DONE]"]);
    }

    #[test]
    fn test_stream_flag_is_set() {
        let body = with_stream_flag(serde_json::json!({"model": "gpt-4"}));
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4");
    }
}
