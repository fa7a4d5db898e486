//! Wire types for the builder model transport
//!
//! The builder speaks an OpenAI-compatible streaming chat-completion protocol
//! with function-call-shaped output: each chunk carries either a delta of the
//! function-call arguments or a terminal finish reason.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A function the model may call, with a JSON schema for its argument object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Response format constraint for the completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

/// A streaming chat-completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub functions: Vec<FunctionDefinition>,
    pub temperature: f32,
    pub top_p: f32,
    pub response_format: ResponseFormat,
}

/// One streamed completion chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// One choice within a chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChunkChoice {
    /// Terminal finish reason, if this choice reports one
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(FinishReason::parse)
    }
}

/// Incremental content of a chunk choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCallDelta>,
}

/// Incremental function-call content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// Why a completion stream finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    FunctionCall,
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "function_call" => FinishReason::FunctionCall,
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::FunctionCall => "function_call",
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(s) => s,
        }
    }
}

/// The argument object streamed by the `replace` function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamedReplacements {
    #[serde(default)]
    pub replacements: Vec<StreamedReplacement>,
}

/// One `(old -> new)` edit as emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamedReplacement {
    pub old: String,
    pub new: String,
}
