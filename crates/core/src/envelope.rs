//! Decoding of raw stream frames into typed events.

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{EngineResult, MalformedFrameSnafu, MalformedPayloadSnafu};
use crate::ids::ThreadId;
use crate::message::{SourceRecord, null_as_default};

const FRAME_EXCERPT_LIMIT: usize = 160;

/// Event kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    BeginStream,
    SearchResults,
    TextChunk,
    RelatedQueries,
    AgentQueryPlan,
    AgentSearchQueries,
    AgentReadResults,
    AgentFinish,
    FinalResponse,
    StreamEnd,
    Error,
}

impl StreamEventKind {
    pub const ALL: [StreamEventKind; 11] = [
        StreamEventKind::BeginStream,
        StreamEventKind::SearchResults,
        StreamEventKind::TextChunk,
        StreamEventKind::RelatedQueries,
        StreamEventKind::AgentQueryPlan,
        StreamEventKind::AgentSearchQueries,
        StreamEventKind::AgentReadResults,
        StreamEventKind::AgentFinish,
        StreamEventKind::FinalResponse,
        StreamEventKind::StreamEnd,
        StreamEventKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeginStream => "begin_stream",
            Self::SearchResults => "search_results",
            Self::TextChunk => "text_chunk",
            Self::RelatedQueries => "related_queries",
            Self::AgentQueryPlan => "agent_query_plan",
            Self::AgentSearchQueries => "agent_search_queries",
            Self::AgentReadResults => "agent_read_results",
            Self::AgentFinish => "agent_finish",
            Self::FinalResponse => "final_response",
            Self::StreamEnd => "stream_end",
            Self::Error => "error",
        }
    }

    /// Matches snake_case kinds, accepting hyphenated spellings as aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }

    /// Terminal kinds end the session; nothing may be applied after them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::StreamEnd | Self::Error)
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct BeginStream {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SourceRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextChunk {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RelatedQueries {
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AgentQueryPlan {
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSearchQueries {
    pub step_number: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentReadResults {
    pub step_number: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SourceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct FinalResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StreamEnd {
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamFailure {
    pub detail: String,
}

/// One decoded frame, closed over the known kinds plus an escape hatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    BeginStream(BeginStream),
    SearchResults(SearchResults),
    TextChunk(TextChunk),
    RelatedQueries(RelatedQueries),
    AgentQueryPlan(AgentQueryPlan),
    AgentSearchQueries(AgentSearchQueries),
    AgentReadResults(AgentReadResults),
    AgentFinish,
    FinalResponse(FinalResponse),
    StreamEnd(StreamEnd),
    Error(StreamFailure),
    /// Kind introduced by a newer backend; applied as a no-op.
    Unknown { kind: String },
}

impl StreamEvent {
    pub fn kind(&self) -> Option<StreamEventKind> {
        let kind = match self {
            Self::BeginStream(_) => StreamEventKind::BeginStream,
            Self::SearchResults(_) => StreamEventKind::SearchResults,
            Self::TextChunk(_) => StreamEventKind::TextChunk,
            Self::RelatedQueries(_) => StreamEventKind::RelatedQueries,
            Self::AgentQueryPlan(_) => StreamEventKind::AgentQueryPlan,
            Self::AgentSearchQueries(_) => StreamEventKind::AgentSearchQueries,
            Self::AgentReadResults(_) => StreamEventKind::AgentReadResults,
            Self::AgentFinish => StreamEventKind::AgentFinish,
            Self::FinalResponse(_) => StreamEventKind::FinalResponse,
            Self::StreamEnd(_) => StreamEventKind::StreamEnd,
            Self::Error(_) => StreamEventKind::Error,
            Self::Unknown { .. } => return None,
        };
        Some(kind)
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Self::Unknown { kind } => kind.as_str(),
            other => other.kind().map_or("unknown", StreamEventKind::as_str),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_some_and(StreamEventKind::is_terminal)
    }

    fn from_envelope(envelope: RawEnvelope) -> EngineResult<Self> {
        let Some(kind) = StreamEventKind::parse(&envelope.event) else {
            return Ok(Self::Unknown {
                kind: envelope.event,
            });
        };

        // Payload-less kinds may omit `data` or send null.
        let data = match envelope.data {
            Value::Null => Value::Object(Default::default()),
            data => data,
        };

        let event = match kind {
            StreamEventKind::BeginStream => Self::BeginStream(payload(kind, data)?),
            StreamEventKind::SearchResults => Self::SearchResults(payload(kind, data)?),
            StreamEventKind::TextChunk => Self::TextChunk(payload(kind, data)?),
            StreamEventKind::RelatedQueries => Self::RelatedQueries(payload(kind, data)?),
            StreamEventKind::AgentQueryPlan => Self::AgentQueryPlan(payload(kind, data)?),
            StreamEventKind::AgentSearchQueries => Self::AgentSearchQueries(payload(kind, data)?),
            StreamEventKind::AgentReadResults => Self::AgentReadResults(payload(kind, data)?),
            StreamEventKind::AgentFinish => Self::AgentFinish,
            StreamEventKind::FinalResponse => Self::FinalResponse(payload(kind, data)?),
            StreamEventKind::StreamEnd => Self::StreamEnd(payload(kind, data)?),
            StreamEventKind::Error => Self::Error(payload(kind, data)?),
        };
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: DeserializeOwned>(kind: StreamEventKind, data: Value) -> EngineResult<T> {
    serde_json::from_value(data).context(MalformedPayloadSnafu {
        stage: "decode-event-payload",
        kind: kind.as_str(),
    })
}

/// Decodes one raw frame.
///
/// Accepts either the bare JSON data of an event or a raw SSE block. Returns
/// `Ok(None)` for keep-alive frames that carry no data.
pub fn decode_frame(raw: &str) -> EngineResult<Option<StreamEvent>> {
    let Some(data) = frame_data(raw) else {
        return Ok(None);
    };

    let envelope: RawEnvelope = serde_json::from_str(&data).context(MalformedFrameSnafu {
        stage: "decode-event-envelope",
        excerpt: excerpt(&data),
    })?;

    StreamEvent::from_envelope(envelope).map(Some)
}

fn frame_data(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.lines().any(is_sse_field_line) {
        return Some(trimmed.to_string());
    }

    let data_lines = trimmed
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>();

    let data = data_lines.join("\n");
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}

fn is_sse_field_line(line: &str) -> bool {
    if line.starts_with(':') {
        return true;
    }
    ["data", "event", "id", "retry"].iter().any(|field| {
        line.strip_prefix(field)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

fn excerpt(data: &str) -> String {
    if data.len() <= FRAME_EXCERPT_LIMIT {
        return data.to_string();
    }
    let mut end = FRAME_EXCERPT_LIMIT;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &data[..end])
}
