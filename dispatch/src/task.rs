use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::traits::Capability;

/// Scheduling priority. Lower values are more urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(5);
    pub const LOWEST: Priority = Priority(9);

    /// Create a priority, clamping values past [`Priority::LOWEST`].
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::LOWEST.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// One step more urgent, saturating at [`Priority::HIGHEST`].
    pub fn promoted(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Speaker roles for a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message in a chat exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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

/// Base64 encoded image attached to a prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub mime: String,
    pub base64: String,
}

/// Which backend operation a task invokes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Generate,
    Chat,
    Embed,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Generate => "generate",
            Method::Chat => "chat",
            Method::Embed => "embed",
        };
        f.write_str(name)
    }
}

/// Method-specific payload. The scheduler never looks inside.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskInput {
    Generate {
        prompt: String,
        image: Option<ImageData>,
    },
    Chat {
        messages: Vec<Message>,
        image: Option<ImageData>,
    },
    Embed {
        text: String,
    },
}

impl TaskInput {
    pub fn method(&self) -> Method {
        match self {
            TaskInput::Generate { .. } => Method::Generate,
            TaskInput::Chat { .. } => Method::Chat,
            TaskInput::Embed { .. } => Method::Embed,
        }
    }
}

/// Constraints a model must meet before a task may run on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelConstraints {
    /// Every one of these must be present.
    pub required: BTreeSet<Capability>,
    /// None of these may be present.
    pub forbidden: BTreeSet<Capability>,
    /// Chosen whenever a backend offers it.
    pub required_model: Option<String>,
    pub forbidden_models: BTreeSet<String>,
}

/// Specification for a unit of inference work.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub input: TaskInput,
    /// `None` means the scheduler's configured default.
    pub priority: Option<Priority>,
    pub constraints: ModelConstraints,
}

impl Task {
    fn with_input(input: TaskInput) -> Self {
        Self {
            input,
            priority: None,
            constraints: ModelConstraints::default(),
        }
    }

    /// Create a text generation task for `prompt`.
    pub fn generate(prompt: impl Into<String>) -> Self {
        Self::with_input(TaskInput::Generate {
            prompt: prompt.into(),
            image: None,
        })
    }

    /// Create a chat completion task over `messages`.
    pub fn chat(messages: Vec<Message>) -> Self {
        Self::with_input(TaskInput::Chat {
            messages,
            image: None,
        })
    }

    /// Create an embedding task for `text`.
    pub fn embed(text: impl Into<String>) -> Self {
        Self::with_input(TaskInput::Embed { text: text.into() })
    }

    /// Attach an image. Embedding tasks ignore it.
    pub fn with_image(mut self, data: ImageData) -> Self {
        match &mut self.input {
            TaskInput::Generate { image, .. } | TaskInput::Chat { image, .. } => {
                *image = Some(data);
            }
            TaskInput::Embed { .. } => {}
        }
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Require `capability` of the chosen model.
    pub fn require(mut self, capability: Capability) -> Self {
        self.constraints.required.insert(capability);
        self
    }

    /// Exclude models advertising `capability`.
    pub fn forbid(mut self, capability: Capability) -> Self {
        self.constraints.forbidden.insert(capability);
        self
    }

    pub fn require_model(mut self, model: impl Into<String>) -> Self {
        self.constraints.required_model = Some(model.into());
        self
    }

    pub fn forbid_model(mut self, model: impl Into<String>) -> Self {
        self.constraints.forbidden_models.insert(model.into());
        self
    }

    pub fn method(&self) -> Method {
        self.input.method()
    }
}
