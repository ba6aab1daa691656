//! Core types shared across the dispatch engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-chosen identifier of one conversation.
pub type ConversationId = String;

/// Fresh random conversation identifier.
pub fn new_conversation_id() -> ConversationId {
    uuid::Uuid::new_v4().to_string()
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message. Never modified after it is appended to a history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Which model backend produced an answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Self-hosted streaming model
    Local,
    /// Hosted chat-completions model
    Remote,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Excerpt of the file the caller is looking at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileContext {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub content: String,
}

impl FileContext {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Render as a fenced excerpt suitable for a system message.
    pub fn to_excerpt(&self) -> String {
        let mut out = String::from("Current file context:\n");
        if let Some(ref path) = self.path {
            out.push_str(&format!("Path: {}\n", path));
        }
        if let Some(ref language) = self.language {
            out.push_str(&format!("Language: {}\n", language));
        }
        let fence_lang = self.language.as_deref().unwrap_or("");
        out.push_str(&format!("```{}\n{}\n```", fence_lang, self.content));
        out
    }
}

/// Inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    pub conversation_id: ConversationId,
    pub message: String,
    #[serde(default, rename = "systemPrompt", alias = "system_prompt")]
    pub system_prompt: Option<String>,
    #[serde(default, rename = "fileContext", alias = "file_context")]
    pub file_context: Option<FileContext>,
}

impl ChatRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: message.into(),
            system_prompt: None,
            file_context: None,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn file_context(mut self, context: FileContext) -> Self {
        self.file_context = Some(context);
        self
    }
}

/// Tagged success/failure result of one `chat` call.
///
/// Failures always carry a cause string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "conversationId")]
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Backend>,
}

impl ChatReply {
    pub fn success(
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        model: Backend,
    ) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            conversation_id: conversation_id.into(),
            model: Some(model),
        }
    }

    pub fn failure(
        conversation_id: impl Into<String>,
        error: impl Into<String>,
        model: Option<Backend>,
    ) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            conversation_id: conversation_id.into(),
            model,
        }
    }

    /// Assistant text on success, the cause string on failure.
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }
}

/// Frames pushed over a persistent connection: intermediate chunks, then the final reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Message { content: String },
    Reply(ChatReply),
}
