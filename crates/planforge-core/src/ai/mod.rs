//! Builder model layer
//!
//! The transport seam (`BuilderModel`), the reqwest client that implements it
//! against OpenAI-compatible APIs, the stream reader that drives one call to
//! a parsed replacement set, and the prompts the pipeline sends.

pub mod client;
pub mod prompts;
pub mod stream;
pub mod types;

pub use client::ModelClient;
pub use stream::{BuilderModel, ChunkStream, StreamFailure, StreamOutcome};
