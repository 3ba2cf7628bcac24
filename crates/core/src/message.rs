use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::ThreadId;
use crate::model::ChatModel;
use crate::timeline::StepTimeline;

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One ranked search hit. Position in the list is its citation number minus one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

impl SourceRecord {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

/// Assistant answer, either in flight (the working message) or committed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: Vec<SourceRecord>,
    #[serde(
        default,
        rename = "related_queries",
        deserialize_with = "null_as_default"
    )]
    pub related_questions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
    #[serde(
        default,
        rename = "agent_response",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_trace: Option<StepTimeline>,
    #[serde(
        default,
        rename = "is_error_message",
        deserialize_with = "null_as_default"
    )]
    pub is_error: bool,
}

impl AssistantMessage {
    /// Builds the error-flagged message committed when a session fails.
    ///
    /// Any partial agent trace is kept so the failed plan stays visible.
    pub fn error(detail: impl Into<String>, agent_trace: Option<StepTimeline>) -> Self {
        Self {
            content: detail.into(),
            agent_trace,
            is_error: true,
            ..Self::default()
        }
    }
}

/// Committed conversation entry, tagged by `role` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
        })
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::User(message) => &message.content,
            Self::Assistant(message) => &message.content,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(message) => Some(message),
            Self::User(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.as_assistant().is_some_and(|message| message.is_error)
    }
}

impl From<AssistantMessage> for ChatMessage {
    fn from(message: AssistantMessage) -> Self {
        Self::Assistant(message)
    }
}

/// Role/content pair sent to the backend as prior conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

/// Committed history for one conversation thread.
///
/// Only the session controller appends to it; everything else reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    thread_id: Option<ThreadId>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn to_turns(&self) -> Vec<HistoryTurn> {
        self.messages
            .iter()
            .map(|message| HistoryTurn {
                role: message.role(),
                content: message.content().to_string(),
            })
            .collect()
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub(crate) fn adopt_thread_id(&mut self, thread_id: ThreadId) {
        self.thread_id = Some(thread_id);
    }

    pub(crate) fn replace_with_thread(&mut self, thread: ThreadResponse) {
        self.messages = thread.messages;
        self.thread_id = Some(thread.thread_id);
    }
}

/// Mode flags that accompany every submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestOptions {
    pub model: ChatModel,
    pub pro_search: bool,
}

/// Body of the streaming chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub history: Vec<HistoryTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub model: ChatModel,
    #[serde(default)]
    pub pro_search: bool,
}

/// Stored thread returned by the backend's thread endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn assistant_messages_decode_backend_field_names() {
        let raw = json!({
            "role": "assistant",
            "content": "Paris [1]",
            "sources": [{"title": "Paris", "url": "https://example.org/paris", "content": "capital"}],
            "related_queries": null,
            "images": ["https://example.org/paris.png"],
            "agent_response": null,
            "is_error_message": false
        });

        let message: ChatMessage = serde_json::from_value(raw).expect("decode");
        let assistant = message.as_assistant().expect("assistant");
        assert_eq!(assistant.content, "Paris [1]");
        assert_eq!(assistant.sources.len(), 1);
        assert!(assistant.related_questions.is_empty());
        assert_eq!(assistant.images, vec!["https://example.org/paris.png"]);
        assert_eq!(assistant.agent_trace, None);
        assert!(!message.is_error());
    }

    #[test]
    fn user_messages_round_trip_through_role_tag() {
        let message = ChatMessage::user("hello");
        let encoded = serde_json::to_value(&message).expect("encode");
        assert_eq!(encoded, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn turns_strip_everything_but_role_and_content() {
        let mut history = ConversationHistory::new();
        history.push(ChatMessage::user("who is elon musk"));
        history.push(
            AssistantMessage {
                content: "An entrepreneur.".to_string(),
                sources: vec![SourceRecord::new("Elon Musk", "https://example.org", "")],
                ..AssistantMessage::default()
            }
            .into(),
        );

        assert_eq!(
            history.to_turns(),
            vec![
                HistoryTurn {
                    role: Role::User,
                    content: "who is elon musk".to_string(),
                },
                HistoryTurn {
                    role: Role::Assistant,
                    content: "An entrepreneur.".to_string(),
                },
            ]
        );
    }

    #[test]
    fn request_omits_missing_thread_id() {
        let request = ChatRequest {
            query: "q".to_string(),
            history: Vec::new(),
            thread_id: None,
            model: ChatModel::Gpt4o,
            pro_search: true,
        };
        let encoded = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            encoded,
            json!({"query": "q", "history": [], "model": "gpt-4o", "pro_search": true})
        );
    }
}
