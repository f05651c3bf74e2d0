#![allow(dead_code)]

use async_trait::async_trait;
use dispatch::{BackendClient, ChunkStream, DispatchError, ImageData, Message};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that replays a fixed script instead of talking to a server.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    models: Vec<String>,
    chunks: Vec<String>,
    steady_chunks: usize,
    chunk_delay: Duration,
    fail_at: Option<usize>,
    hang_listing: bool,
    refuse_listing: bool,
    embedding: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            chunks: vec!["a".into(), "b".into(), "c".into()],
            embedding: vec![0.5, 0.25],
            ..Self::default()
        }
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Emit the first `steady` chunks immediately, then wait `delay` before
    /// each of the rest.
    pub fn slow_after(mut self, steady: usize, delay: Duration) -> Self {
        self.steady_chunks = steady;
        self.chunk_delay = delay;
        self
    }

    /// Fail the stream instead of emitting chunk number `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Never answer `list_models`.
    pub fn hanging(mut self) -> Self {
        self.hang_listing = true;
        self
    }

    /// Answer `list_models` with an error.
    pub fn unreachable(mut self) -> Self {
        self.refuse_listing = true;
        self
    }

    /// Number of generate/chat/embed calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_client(self) -> Arc<dyn BackendClient> {
        Arc::new(self)
    }

    fn script(&self) -> ChunkStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks.clone();
        let steady = self.steady_chunks;
        let delay = self.chunk_delay;
        let fail_at = self.fail_at;
        Box::pin(async_stream::stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if fail_at == Some(i) {
                    yield Err(DispatchError::Execution("backend went away".into()));
                    break;
                }
                if i >= steady && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        })
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn list_models(&self) -> Result<Vec<String>, DispatchError> {
        if self.hang_listing {
            futures_util::future::pending::<()>().await;
        }
        if self.refuse_listing {
            return Err(DispatchError::Backend("connection refused".into()));
        }
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _image: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError> {
        Ok(self.script())
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _image: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError> {
        Ok(self.script())
    }

    async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(0) {
            return Err(DispatchError::Execution("backend went away".into()));
        }
        Ok(self.embedding.clone())
    }
}

/// Registry shared by the scheduler and pool tests.
pub fn registry() -> dispatch::CapabilityRegistry {
    use dispatch::Capability::*;
    dispatch::CapabilityRegistry::new()
        .with_model("m1", [Fast, Chat, Generate])
        .with_model("m2", [Smart, Chat, Generate])
        .with_model("e1", [Fast, Embed])
}
