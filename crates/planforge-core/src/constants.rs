//! Build pipeline constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// Build orchestration limits
pub mod build {
    use super::*;

    /// Transport retries per file (stream open/recv, inactivity, bad finish)
    pub const MAX_RETRIES: u32 = 3;

    /// Replacement retries per file, spent only when applied edits fail
    pub const MAX_REPLACEMENT_RETRIES: u32 = 1;

    /// Maximum queued builds merged into one model call per path
    pub const MAX_BATCH_SIZE: usize = 5;

    /// Default chunk-inactivity timeout for the builder stream
    pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Builder model defaults
pub mod model {
    /// Default builder model id
    pub const BUILDER_MODEL: &str = "gpt-4";

    /// Low temperature - replacements must track the current state closely
    pub const TEMPERATURE: f32 = 0.2;

    /// Narrow nucleus sampling for the same reason
    pub const TOP_P: f32 = 0.1;

    /// The single function the builder model is allowed to call
    pub const REPLACE_FN_NAME: &str = "replace";
}

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Streaming timeout - a full build stream over a large file can run minutes
    pub const STREAM_TIMEOUT: Duration = Duration::from_secs(600);
}
