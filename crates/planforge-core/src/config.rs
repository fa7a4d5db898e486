//! Build pipeline configuration

use std::time::Duration;

use crate::constants;

/// Configuration for the per-plan build pipeline
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Model id used for builder calls
    pub model: String,
    /// Sampling temperature for builder calls
    pub temperature: f32,
    /// Nucleus sampling cutoff for builder calls
    pub top_p: f32,
    /// Chunk-inactivity timeout for the builder stream
    pub chunk_timeout: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            model: constants::model::BUILDER_MODEL.to_string(),
            temperature: constants::model::TEMPERATURE,
            top_p: constants::model::TOP_P,
            chunk_timeout: constants::build::CHUNK_TIMEOUT,
        }
    }
}

/// Configuration for the OpenAI-compatible model transport
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    /// Base URL of the chat-completions endpoint
    pub api_base: String,
    /// Bearer token for the API
    pub api_key: String,
}

impl ModelClientConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    /// Full URL of the streaming chat-completions endpoint
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}
