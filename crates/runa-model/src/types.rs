use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Content block types ──────────────────────────────────────────────────────

/// A single content block in a user message.
///
/// Images are represented as data URLs (`data:<mime>;base64,<b64>`) or HTTPS
/// URLs for providers that accept remote references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
    Image { image_url: String },
}

impl UserContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into() }
    }
}

/// A single content block in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    Thinking { thinking: String },
    ToolCall(ToolCall),
}

/// A tool invocation requested by the model.
///
/// `id` is stable per model-generated call and is echoed back in the matching
/// [`ToolResultMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub arguments: Map<String, Value>,
}

/// A single content block in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    Image { image_url: String },
}

impl ToolResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

// ─── Message types ────────────────────────────────────────────────────────────

/// A message in the conversation history, discriminated by `role`.
///
/// `Custom` carries application-defined content: the engine estimates and
/// cuts around it but never interprets it, and the default provider
/// conversion filters it out of the request payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
    Custom(CustomMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub content: Vec<UserContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ToolResultContent>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomMessage {
    /// Application-defined discriminator, opaque to the engine.
    pub kind: String,
    pub content: String,
}

impl Message {
    /// Plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: vec![UserContent::text(text)],
        })
    }

    /// User message with text plus attached images.
    pub fn user_with_images(text: impl Into<String>, images: Vec<UserContent>) -> Self {
        let mut content = vec![UserContent::text(text)];
        content.extend(images);
        Self::User(UserMessage { content })
    }

    pub fn custom(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Custom(CustomMessage {
            kind: kind.into(),
            content: content.into(),
        })
    }

    /// Role discriminator as it appears on the wire.
    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) => "tool_result",
            Self::Custom(_) => "custom",
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant(_))
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultMessage> {
        match self {
            Self::ToolResult(m) => Some(m),
            _ => None,
        }
    }

    /// Concatenated visible text of this message, if it carries any.
    pub fn text(&self) -> String {
        match self {
            Self::User(m) => m
                .content
                .iter()
                .filter_map(|c| match c {
                    UserContent::Text { text } => Some(text.as_str()),
                    UserContent::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            Self::Assistant(m) => m.text(),
            Self::ToolResult(m) => m.text(),
            Self::Custom(m) => m.content.clone(),
        }
    }
}

impl AssistantMessage {
    /// Empty in-progress message, used as the streaming tail.
    pub fn partial() -> Self {
        Self {
            content: Vec::new(),
            stop_reason: StopReason::Stop,
            usage: None,
            error_message: None,
        }
    }

    /// Terminal message synthesized when a run is cancelled.
    pub fn aborted() -> Self {
        Self {
            content: vec![AssistantContent::Text {
                text: "Aborted".into(),
            }],
            stop_reason: StopReason::Aborted,
            usage: None,
            error_message: None,
        }
    }

    /// Terminal message carrying a provider error.
    pub fn from_error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: vec![AssistantContent::Text {
                text: message.clone(),
            }],
            stop_reason: StopReason::Error,
            usage: None,
            error_message: Some(message),
        }
    }

    /// Concatenated text blocks (thinking and tool calls excluded).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool-call blocks in the order the model produced them.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    /// True for the terminal states that end a run without tool dispatch.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self.stop_reason, StopReason::Error | StopReason::Aborted)
    }
}

impl ToolResultMessage {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResultContent::Text { text } => Some(text.as_str()),
                ToolResultContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Sensitive,
    Error,
    Aborted,
}

/// Token usage reported by the provider for one completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total: u64,
}

impl Usage {
    /// Context footprint for this turn.  Prefers the provider's native total;
    /// falls back to summing the components when the total is absent (zero).
    pub fn context_total(&self) -> u64 {
        if self.total != 0 {
            self.total
        } else {
            self.input + self.output + self.cache_read + self.cache_write
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
