//! HTTP client for an Ollama model server.
//!
//! [`OllamaClient`] implements [`BackendClient`] by streaming `/api/generate`
//! and `/api/chat` responses, requesting embeddings from `/api/embed` and
//! listing installed models through `/api/tags`.

use async_trait::async_trait;
use tokio_stream::StreamExt;

use ollama_rs::{
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage},
        completion::request::GenerationRequest,
        embeddings::request::GenerateEmbeddingsRequest,
        images::Image,
    },
    Ollama,
};

use crate::task::{ImageData, Message, Role};
use crate::traits::{BackendClient, ChunkStream, DispatchError};

pub struct OllamaClient {
    inner: Ollama,
}

impl OllamaClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, DispatchError> {
        let inner = Ollama::try_new(base_url.as_ref())
            .map_err(|e| DispatchError::Config(format!("{}: {e}", base_url.as_ref())))?;
        Ok(Self { inner })
    }
}

fn image(data: &ImageData) -> Image {
    Image::from_base64(data.base64.clone())
}

fn chat_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::System => ChatMessage::system(message.content.clone()),
        Role::User => ChatMessage::user(message.content.clone()),
        Role::Assistant => ChatMessage::assistant(message.content.clone()),
    }
}

#[async_trait]
impl BackendClient for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, DispatchError> {
        let models = self
            .inner
            .list_local_models()
            .await
            .map_err(|e| DispatchError::Backend(e.to_string()))?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image_data: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError> {
        let mut req = GenerationRequest::new(model.to_string(), prompt.to_string());
        if let Some(data) = image_data {
            req = req.add_image(image(data));
        }
        let stream = self
            .inner
            .generate_stream(req)
            .await
            .map_err(|e| DispatchError::Execution(e.to_string()))?;
        let mapped = stream.map(|res| {
            res.map_err(|e| DispatchError::Execution(e.to_string()))
                .map(|chunk| {
                    chunk
                        .into_iter()
                        .map(|c| c.response)
                        .collect::<Vec<_>>()
                        .join("")
                })
        });
        Ok(Box::pin(mapped))
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        image_data: Option<&ImageData>,
    ) -> Result<ChunkStream, DispatchError> {
        let mut history: Vec<ChatMessage> = messages.iter().map(chat_message).collect();
        if let (Some(data), Some(last)) = (image_data, history.pop()) {
            history.push(last.with_images(vec![image(data)]));
        }
        let req = ChatMessageRequest::new(model.to_string(), history);
        let stream = self
            .inner
            .send_chat_messages_stream(req)
            .await
            .map_err(|e| DispatchError::Execution(e.to_string()))?;
        let mapped = stream.map(|res| {
            res.map(|r| r.message.content)
                .map_err(|_| DispatchError::Execution("chat stream interrupted".into()))
        });
        Ok(Box::pin(mapped))
    }

    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, DispatchError> {
        let req = GenerateEmbeddingsRequest::new(model.to_string(), input.into());
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(|e| DispatchError::Execution(e.to_string()))?;
        res.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::Execution("empty embedding response".into()))
    }
}
