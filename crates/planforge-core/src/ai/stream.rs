//! Builder model stream reader
//!
//! Drives one streaming completion to the first parseable `replace` argument
//! object. Chunks reset an inactivity deadline; cancellation wins over every
//! other outcome. The argument buffer is re-parsed after each delta, so the
//! reader returns as soon as the streamed JSON becomes a valid non-empty
//! replacement set, without waiting for the stream to end.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ai::types::{ChatRequest, CompletionChunk, FinishReason, StreamedReplacement, StreamedReplacements};
use crate::plan::events::{BuildInfo, StreamMessage};

/// Items yielded by an open completion stream
pub type ChunkResult = anyhow::Result<CompletionChunk>;

/// Receiver half of an open completion stream
pub type ChunkStream = mpsc::UnboundedReceiver<ChunkResult>;

/// The streaming completion transport the build pipeline runs on
#[async_trait]
pub trait BuilderModel: Send + Sync {
    /// Open a streaming completion. An `Err` here is a stream-open failure;
    /// errors after open arrive as `Err` items on the returned channel.
    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream>;
}

/// Stream lifecycle failures, all candidates for a transport retry
#[derive(Debug, Error)]
pub enum StreamFailure {
    #[error("error creating completion stream: {0}")]
    Open(#[source] anyhow::Error),

    #[error("error receiving stream chunk: {0}")]
    Recv(#[source] anyhow::Error),

    #[error("stream timeout due to inactivity")]
    Inactivity,

    #[error("stream chunk carried no choices")]
    EmptyChunk,

    #[error("stream finished without a function call, reason: {0}")]
    BadFinish(String),

    #[error("stream ended before replacements were parsed")]
    UnparsedEnd,
}

impl StreamFailure {
    /// Whether a retry for this failure backs off before the next attempt.
    /// A finish without a function call retries immediately.
    pub fn should_sleep(&self) -> bool {
        !matches!(self, StreamFailure::BadFinish(_))
    }
}

/// Outcome of one streaming attempt
#[derive(Debug)]
pub enum StreamOutcome {
    /// A non-empty replacement set was parsed from the argument buffer
    Parsed(Vec<StreamedReplacement>),
    /// The plan was canceled; not an error and never retried
    Canceled,
    Failed(StreamFailure),
}

/// Run one completion stream to its outcome.
///
/// Emits a `BuildInfo` progress event per function-call chunk on `events`.
pub async fn read_replacements(
    model: &dyn BuilderModel,
    req: ChatRequest,
    path: &str,
    chunk_timeout: Duration,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<StreamMessage>,
) -> StreamOutcome {
    let mut rx = match model.stream_chat(req).await {
        Ok(rx) => rx,
        Err(e) => return StreamOutcome::Failed(StreamFailure::Open(e)),
    };

    let mut buffer = String::new();

    loop {
        // The per-receive deadline restarts on every chunk, giving the
        // chunk-inactivity timeout without a shared timer to reset.
        let received = tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Canceled,
            received = tokio::time::timeout(chunk_timeout, rx.recv()) => received,
        };

        let item = match received {
            Ok(item) => item,
            Err(_) => return StreamOutcome::Failed(StreamFailure::Inactivity),
        };

        let chunk = match item {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                if cancel.is_cancelled() {
                    debug!("File {}: stream canceled", path);
                    return StreamOutcome::Canceled;
                }
                return StreamOutcome::Failed(StreamFailure::Recv(e));
            }
            // Stream closed without a terminal finish or a parsed set.
            None => return StreamOutcome::Failed(StreamFailure::UnparsedEnd),
        };

        let Some(choice) = chunk.choices.first() else {
            return StreamOutcome::Failed(StreamFailure::EmptyChunk);
        };

        if let Some(reason) = choice.finish_reason() {
            if reason != FinishReason::FunctionCall {
                return StreamOutcome::Failed(StreamFailure::BadFinish(
                    reason.as_str().to_string(),
                ));
            }
            // Finished with a function call but the buffer never parsed.
            warn!(
                "File {}: stream finished before replacements parsed, buffer: {}",
                path, buffer
            );
            return StreamOutcome::Failed(StreamFailure::UnparsedEnd);
        }

        let Some(function_call) = &choice.delta.function_call else {
            debug!(
                "File {}: no function call in delta, content: {:?}",
                path, choice.delta.content
            );
            continue;
        };

        let _ = events.send(StreamMessage::BuildInfo(BuildInfo {
            path: path.to_string(),
            num_tokens: 1,
            finished: false,
        }));

        buffer.push_str(&function_call.arguments);

        if let Ok(streamed) = serde_json::from_str::<StreamedReplacements>(&buffer) {
            if !streamed.replacements.is_empty() {
                debug!(
                    "File {}: parsed {} replacement(s)",
                    path,
                    streamed.replacements.len()
                );
                return StreamOutcome::Parsed(streamed.replacements);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{ChatMessage, ChunkChoice, ChunkDelta, FunctionCallDelta, ResponseFormat};
    use parking_lot::Mutex;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage::user("test")],
            functions: vec![],
            temperature: 0.2,
            top_p: 0.1,
            response_format: ResponseFormat::json_object(),
        }
    }

    fn args_chunk(arguments: &str) -> CompletionChunk {
        CompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: None,
                    function_call: Some(FunctionCallDelta {
                        name: None,
                        arguments: arguments.to_string(),
                    }),
                },
                finish_reason: None,
            }],
        }
    }

    fn finish_chunk(reason: &str) -> CompletionChunk {
        CompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta::default(),
                finish_reason: Some(reason.to_string()),
            }],
        }
    }

    fn content_chunk(text: &str) -> CompletionChunk {
        CompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(text.to_string()),
                    function_call: None,
                },
                finish_reason: None,
            }],
        }
    }

    /// Scripted model: each `stream_chat` call pops the next script. Senders
    /// for open-ended scripts are parked so the channel stays open.
    struct ScriptedModel {
        scripts: Mutex<Vec<Script>>,
        parked: Mutex<Vec<mpsc::UnboundedSender<ChunkResult>>>,
    }

    enum Script {
        OpenError(String),
        Chunks(Vec<ChunkResult>),
        /// Send the chunks but keep the channel open afterwards
        ChunksThenSilence(Vec<ChunkResult>),
    }

    impl ScriptedModel {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                parked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BuilderModel for ScriptedModel {
        async fn stream_chat(&self, _req: ChatRequest) -> anyhow::Result<ChunkStream> {
            let script = {
                let mut scripts = self.scripts.lock();
                assert!(!scripts.is_empty(), "unexpected extra stream_chat call");
                scripts.remove(0)
            };
            match script {
                Script::OpenError(msg) => Err(anyhow::anyhow!(msg)),
                Script::Chunks(chunks) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    for chunk in chunks {
                        let _ = tx.send(chunk);
                    }
                    Ok(rx)
                }
                Script::ChunksThenSilence(chunks) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    for chunk in chunks {
                        let _ = tx.send(chunk);
                    }
                    self.parked.lock().push(tx);
                    Ok(rx)
                }
            }
        }
    }

    fn event_channel() -> (
        mpsc::UnboundedSender<StreamMessage>,
        mpsc::UnboundedReceiver<StreamMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_parses_replacements_across_chunks() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![
            Ok(args_chunk(r#"{"replacements":[{"old":"#)),
            Ok(args_chunk(r#""b","new":"B"}]}"#)),
        ])]);
        let (tx, mut rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;

        match outcome {
            StreamOutcome::Parsed(reps) => {
                assert_eq!(reps.len(), 1);
                assert_eq!(reps[0].old, "b");
                assert_eq!(reps[0].new, "B");
            }
            other => panic!("expected Parsed, got {:?}", other),
        }

        // One progress event per function-call chunk.
        let mut tokens = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                StreamMessage::BuildInfo(info) => {
                    assert_eq!(info.path, "foo.go");
                    assert!(!info.finished);
                    tokens += info.num_tokens;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(tokens, 2);
    }

    #[tokio::test]
    async fn test_content_only_chunks_are_ignored() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![
            Ok(content_chunk("thinking out loud")),
            Ok(args_chunk(r#"{"replacements":[{"old":"a","new":"A"}]}"#)),
        ])]);
        let (tx, mut rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(outcome, StreamOutcome::Parsed(_)));

        // No progress event for the content-only chunk.
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_open_error() {
        let model = ScriptedModel::new(vec![Script::OpenError("connection refused".to_string())]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::Open(_))
        ));
    }

    #[tokio::test]
    async fn test_recv_error() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![Err(anyhow::anyhow!(
            "connection reset"
        ))])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::Recv(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_finish_reason() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![Ok(finish_chunk("stop"))])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        match outcome {
            StreamOutcome::Failed(StreamFailure::BadFinish(reason)) => {
                assert_eq!(reason, "stop");
            }
            other => panic!("expected BadFinish, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_function_call_finish_without_parse() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![
            Ok(args_chunk(r#"{"replacements":"#)),
            Ok(finish_chunk("function_call")),
        ])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::UnparsedEnd)
        ));
    }

    #[tokio::test]
    async fn test_stream_end_before_parse() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![Ok(args_chunk("{"))])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::UnparsedEnd)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout() {
        let model = ScriptedModel::new(vec![Script::ChunksThenSilence(vec![Ok(args_chunk(
            r#"{"repl"#,
        ))])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::Inactivity)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let model = ScriptedModel::new(vec![Script::ChunksThenSilence(vec![])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(outcome, StreamOutcome::Canceled));
    }

    #[tokio::test]
    async fn test_empty_chunk_fails() {
        let model = ScriptedModel::new(vec![Script::Chunks(vec![Ok(CompletionChunk {
            choices: vec![],
        })])]);
        let (tx, _rx) = event_channel();
        let cancel = CancellationToken::new();

        let outcome = read_replacements(
            &model,
            request(),
            "foo.go",
            Duration::from_secs(30),
            &cancel,
            &tx,
        )
        .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamFailure::EmptyChunk)
        ));
    }

    #[test]
    fn test_bad_finish_retries_without_sleep() {
        assert!(!StreamFailure::BadFinish("stop".to_string()).should_sleep());
        assert!(StreamFailure::Inactivity.should_sleep());
        assert!(StreamFailure::UnparsedEnd.should_sleep());
        assert!(StreamFailure::Open(anyhow::anyhow!("x")).should_sleep());
    }
}
