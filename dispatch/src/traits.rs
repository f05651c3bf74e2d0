use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::task::{ImageData, Message};

/// Tags describing what a model can do.
///
/// `Fast`, `Smart` and `Huge` double as speed/quality hints for ranking; see
/// [`crate::model::speed_rank`] and [`crate::model::quality_rank`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Fast,
    Smart,
    Vision,
    Embed,
    Chat,
    Generate,
    Huge,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("no model satisfies the task constraints")]
    NoSuitableModel,
    #[error("no backend is available")]
    NoAvailableBackend,
    #[error("backend {backend} did not list models within {after:?}")]
    BackendTimeout { backend: String, after: Duration },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("task cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stream of text chunks produced by a backend.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, DispatchError>> + Send>>;

/// One remote inference endpoint.
///
/// Implementations only translate calls onto the wire. Load, liveness and
/// model snapshots are tracked by [`crate::pool::Backend`].
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Names of the models the endpoint can currently serve.
    async fn list_models(&self) -> Result<Vec<String>, DispatchError>;

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError>;

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        image: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError>;

    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, DispatchError>;
}
