//! Conversation messages and the role-alternation pass applied before dispatch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Role of the synthetic message inserted between two messages sharing `self`.
    fn opposite(self) -> Role {
        match self {
            Role::User => Role::Assistant,
            Role::Assistant | Role::System => Role::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        f.write_str(role)
    }
}

/// One message of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Images previously produced by the model; only meaningful on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<GeneratedImage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach images the model produced in an earlier turn.
    pub fn with_images(mut self, images: Vec<GeneratedImage>) -> Self {
        self.images = images;
        self
    }
}

/// Message content: either plain text or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// A typed part of multi-part content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// An image given by URL or `data:` URI.
    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// An image produced by the model, as delivered in `delta.images[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(rename = "type", default = "GeneratedImage::default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub image_url: ImageUrl,
}

impl GeneratedImage {
    fn default_kind() -> String {
        "image_url".to_string()
    }
}

/// Restore strict role alternation.
///
/// Returns a new list in which no two consecutive messages share a role and
/// the first message is never from the assistant. Gaps are filled with empty
/// messages of the opposite role; the input is left untouched.
pub fn normalize_roles(messages: &[Message]) -> Vec<Message> {
    let mut normalized = Vec::with_capacity(messages.len() + 1);

    for message in messages {
        let previous = normalized.last().map(|m: &Message| m.role);

        match previous {
            None if message.role == Role::Assistant => {
                normalized.push(Message::user(""));
            }
            Some(role) if role == message.role => {
                normalized.push(Message::new(role.opposite(), ""));
            }
            _ => {}
        }

        normalized.push(message.clone());
    }

    normalized
}
