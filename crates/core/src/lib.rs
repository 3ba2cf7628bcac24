pub mod accumulator;
pub mod citation;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;
pub mod model;
pub mod session;
pub mod timeline;

pub use accumulator::{AnswerAccumulator, Applied};
pub use citation::{Citation, Segment, cited_sources, resolve, segments};
pub use envelope::{StreamEvent, StreamEventKind, decode_frame};
pub use error::{EngineError, EngineResult};
pub use ids::{StreamSessionId, ThreadId};
pub use message::{
    AssistantMessage, ChatMessage, ChatRequest, ConversationHistory, HistoryTurn,
    RequestOptions, Role, SourceRecord, ThreadResponse, UserMessage,
};
pub use model::{ChatModel, DEFAULT_CHAT_MODEL, DEFAULT_LOCAL_MODEL};
pub use session::{
    IgnoreReason, STREAM_CLOSED_DETAIL, SessionController, SessionPhase, SessionUpdate,
    Submission,
};
pub use timeline::{StepStatus, StepTimeline, StepTimelineEntry};
