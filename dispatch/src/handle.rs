//! Caller-side handle of a submitted task and its scheduler-side sink.
//!
//! The [`TaskHandle`] receives chunks, the terminal [`Outcome`] and state
//! updates; the crate-private `TaskSink` produces them. Finishing the sink
//! closes the chunk channel before the terminal state is published, so no
//! chunk can follow a terminal state.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::traits::DispatchError;

/// Lifecycle of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Queued,
    Assigned,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Incremental piece of output.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    Text(String),
    Embedding(Vec<f32>),
}

/// Whole result of a completed task.
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    Text(String),
    Embedding(Vec<f32>),
}

/// How a task ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Completed(Output),
    Failed(DispatchError),
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> TaskState {
        match self {
            Outcome::Completed(_) => TaskState::Completed,
            Outcome::Failed(_) => TaskState::Failed,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }
}

pub struct TaskHandle {
    id: u64,
    chunks: mpsc::Receiver<Chunk>,
    /// Set once cancellation cut the chunk stream short.
    discarded: bool,
    outcome: oneshot::Receiver<Outcome>,
    state: watch::Receiver<TaskState>,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next streamed chunk, or `None` once the stream has ended.
    ///
    /// After a cancellation that took effect, chunks still buffered in the
    /// channel are discarded rather than returned.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        if self.discarded || self.cancelled_before_finish() {
            self.discard();
            return None;
        }
        let running = !self.state().is_terminal();
        tokio::select! {
            biased;
            _ = self.token.cancelled(), if running => {}
            chunk = self.chunks.recv() => return chunk,
        }
        self.discard();
        None
    }

    fn cancelled_before_finish(&self) -> bool {
        self.token.is_cancelled()
            && !matches!(self.state(), TaskState::Completed | TaskState::Failed)
    }

    fn discard(&mut self) {
        self.discarded = true;
        self.chunks.close();
        while self.chunks.try_recv().is_ok() {}
    }

    /// Request cooperative cancellation. No effect after a terminal state.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Receiver following every state change.
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// Wait for the terminal outcome. Unread chunks are discarded; the full
    /// result is still carried by [`Outcome::Completed`].
    pub async fn outcome(self) -> Outcome {
        let TaskHandle {
            chunks, outcome, ..
        } = self;
        drop(chunks);
        outcome
            .await
            .unwrap_or_else(|_| Outcome::Failed(DispatchError::Execution("task abandoned".into())))
    }

    /// Wait for the full text of a generate or chat task.
    pub async fn collect(self) -> Result<String, DispatchError> {
        match self.outcome().await {
            Outcome::Completed(Output::Text(text)) => Ok(text),
            Outcome::Completed(Output::Embedding(_)) => Err(DispatchError::Execution(
                "embedding task produced no text".into(),
            )),
            Outcome::Failed(e) => Err(e),
            Outcome::Cancelled => Err(DispatchError::Cancelled),
        }
    }
}

pub(crate) struct TaskSink {
    chunks: Option<mpsc::Sender<Chunk>>,
    outcome: oneshot::Sender<Outcome>,
    state: watch::Sender<TaskState>,
    token: CancellationToken,
}

impl TaskSink {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Move to `next` unless the task already reached a terminal state.
    pub(crate) fn transition(&self, next: TaskState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Forward a chunk, waiting for channel capacity. Returns `false` once
    /// the caller stopped listening.
    pub(crate) async fn send(&mut self, chunk: Chunk) -> bool {
        let delivered = match &self.chunks {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => false,
        };
        if !delivered {
            self.chunks = None;
        }
        delivered
    }

    pub(crate) fn finish(self, outcome: Outcome) {
        let TaskSink {
            chunks,
            outcome: tx,
            state,
            ..
        } = self;
        drop(chunks);
        let terminal = outcome.state();
        state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });
        let _ = tx.send(outcome);
    }
}

pub(crate) fn task_channel(id: u64, buffer: usize) -> (TaskSink, TaskHandle) {
    let (chunk_tx, chunk_rx) = mpsc::channel(buffer.max(1));
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (state_tx, state_rx) = watch::channel(TaskState::Queued);
    let token = CancellationToken::new();
    let sink = TaskSink {
        chunks: Some(chunk_tx),
        outcome: outcome_tx,
        state: state_tx,
        token: token.clone(),
    };
    let handle = TaskHandle {
        id,
        chunks: chunk_rx,
        discarded: false,
        outcome: outcome_rx,
        state: state_rx,
        token,
    };
    (sink, handle)
}
