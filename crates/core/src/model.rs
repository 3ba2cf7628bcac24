use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult, UnknownModelSnafu};

/// Answer models the backend knows how to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChatModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "llama-3-70b")]
    Llama70b,
    #[serde(rename = "llama3")]
    LocalLlama3,
    #[serde(rename = "gemma")]
    LocalGemma,
    #[serde(rename = "mistral")]
    LocalMistral,
    #[serde(rename = "phi3:14b")]
    LocalPhi3,
}

/// Hosted model used when nothing else is configured.
pub const DEFAULT_CHAT_MODEL: ChatModel = ChatModel::Gpt35Turbo;

/// Model selected when local mode is switched on.
pub const DEFAULT_LOCAL_MODEL: ChatModel = ChatModel::LocalLlama3;

impl ChatModel {
    pub const ALL: [ChatModel; 7] = [
        ChatModel::Gpt35Turbo,
        ChatModel::Gpt4o,
        ChatModel::Llama70b,
        ChatModel::LocalLlama3,
        ChatModel::LocalGemma,
        ChatModel::LocalMistral,
        ChatModel::LocalPhi3,
    ];

    /// Wire identifier sent in the request body.
    pub fn id(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "gpt-3.5-turbo",
            Self::Gpt4o => "gpt-4o",
            Self::Llama70b => "llama-3-70b",
            Self::LocalLlama3 => "llama3",
            Self::LocalGemma => "gemma",
            Self::LocalMistral => "mistral",
            Self::LocalPhi3 => "phi3:14b",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "GPT-3.5 Turbo",
            Self::Gpt4o => "GPT-4o",
            Self::Llama70b => "Llama 3 70B",
            Self::LocalLlama3 => "Llama 3 (local)",
            Self::LocalGemma => "Gemma (local)",
            Self::LocalMistral => "Mistral (local)",
            Self::LocalPhi3 => "Phi-3 14B (local)",
        }
    }

    /// Local models run on the user's machine and skip hosted-only features.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Self::LocalLlama3 | Self::LocalGemma | Self::LocalMistral | Self::LocalPhi3
        )
    }

    pub fn parse(raw: &str) -> EngineResult<Self> {
        let needle = raw.trim();
        Self::ALL
            .into_iter()
            .find(|model| model.id().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                UnknownModelSnafu {
                    stage: "parse-chat-model",
                    raw: raw.to_string(),
                }
                .build()
            })
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.id())
    }
}

impl FromStr for ChatModel {
    type Err = EngineError;

    fn from_str(raw: &str) -> EngineResult<Self> {
        Self::parse(raw)
    }
}
