//! Runs one task against a backend client and relays its output.

use std::future::Future;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::handle::{Chunk, Output, TaskSink};
use crate::task::TaskInput;
use crate::traits::{BackendClient, ChunkStream, DispatchError};

pub(crate) enum Relayed {
    Completed(Output),
    Cancelled,
    Failed {
        error: DispatchError,
        /// Chunks already produced before the failure.
        emitted: usize,
    },
}

async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn next_chunk(
    stream: &mut ChunkStream,
    timeout: Option<Duration>,
) -> Option<Result<String, DispatchError>> {
    match timeout {
        None => stream.next().await,
        Some(after) => match tokio::time::timeout(after, stream.next()).await {
            Ok(item) => item,
            Err(_) => Some(Err(DispatchError::Execution(format!(
                "no output within {after:?}"
            )))),
        },
    }
}

/// Execute `input` on `model` and forward output through `sink`.
///
/// Cancellation is checked before the call and between chunks. Dropping the
/// remote stream on cancellation aborts the underlying request.
pub(crate) async fn relay(
    client: &dyn BackendClient,
    model: &str,
    input: &TaskInput,
    sink: &mut TaskSink,
    timeout: Option<Duration>,
) -> Relayed {
    let token = sink.token().clone();
    let opened = match input {
        TaskInput::Generate { prompt, image } => {
            until_cancelled(&token, client.generate(model, prompt, image.as_ref())).await
        }
        TaskInput::Chat { messages, image } => {
            until_cancelled(&token, client.chat(model, messages, image.as_ref())).await
        }
        TaskInput::Embed { text } => {
            return match until_cancelled(&token, client.embed(model, text)).await {
                None => Relayed::Cancelled,
                Some(Err(error)) => Relayed::Failed { error, emitted: 0 },
                Some(Ok(vector)) => {
                    sink.send(Chunk::Embedding(vector.clone())).await;
                    Relayed::Completed(Output::Embedding(vector))
                }
            };
        }
    };

    let mut stream = match opened {
        None => return Relayed::Cancelled,
        Some(Err(error)) => return Relayed::Failed { error, emitted: 0 },
        Some(Ok(stream)) => stream,
    };

    let mut text = String::new();
    let mut emitted = 0;
    loop {
        match until_cancelled(&token, next_chunk(&mut stream, timeout)).await {
            None => return Relayed::Cancelled,
            Some(None) => return Relayed::Completed(Output::Text(text)),
            Some(Some(Err(error))) => return Relayed::Failed { error, emitted },
            Some(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                emitted += 1;
                text.push_str(&chunk);
                if until_cancelled(&token, sink.send(Chunk::Text(chunk)))
                    .await
                    .is_none()
                {
                    return Relayed::Cancelled;
                }
            }
        }
    }
}
