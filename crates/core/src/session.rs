use snafu::ensure;

use crate::accumulator::{AnswerAccumulator, Applied};
use crate::envelope::decode_frame;
use crate::error::{EmptyQuerySnafu, EngineResult, SessionBusySnafu};
use crate::ids::{StreamSessionId, ThreadId};
use crate::message::{
    AssistantMessage, ChatMessage, ChatRequest, ConversationHistory, RequestOptions,
    ThreadResponse,
};

/// Detail committed when the transport closes without `stream_end` or `error`.
pub const STREAM_CLOSED_DETAIL: &str = "answer stream ended before a terminal event";

/// Request/response lifecycle for one session.
///
/// Committing and failing are transient: both return to `Idle` within the call
/// that observed the terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Sending(StreamSessionId),
    Streaming(StreamSessionId),
}

impl SessionPhase {
    pub fn active_session(self) -> Option<StreamSessionId> {
        match self {
            Self::Idle => None,
            Self::Sending(session_id) | Self::Streaming(session_id) => Some(session_id),
        }
    }

    /// Returns true when data tagged with `session_id` belongs to the live session.
    pub fn accepts(self, session_id: StreamSessionId) -> bool {
        self.active_session() == Some(session_id)
    }
}

/// Everything the transport needs to open the stream for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub session_id: StreamSessionId,
    pub request: ChatRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The frame belongs to an abandoned or already finished session.
    StaleSession,
    KeepAlive,
    MalformedFrame,
    /// The event decoded but the accumulator refused it.
    Rejected,
}

/// What the render side should do after one controller transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Snapshot(AssistantMessage),
    Committed,
    Failed { detail: String },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone)]
pub struct SessionController {
    phase: SessionPhase,
    next_session_id: StreamSessionId,
    accumulator: AnswerAccumulator,
    pro_search: bool,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            next_session_id: StreamSessionId::new(1),
            accumulator: AnswerAccumulator::new(),
            pro_search: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn active_session(&self) -> Option<StreamSessionId> {
        self.phase.active_session()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SessionPhase::Idle
    }

    pub fn is_streaming_pro_search(&self) -> bool {
        self.pro_search && self.active_session().is_some()
    }

    /// Working message while frames are flowing, `None` otherwise.
    pub fn snapshot(&self) -> Option<AssistantMessage> {
        match self.phase {
            SessionPhase::Streaming(_) => Some(self.accumulator.snapshot()),
            SessionPhase::Idle | SessionPhase::Sending(_) => None,
        }
    }

    /// Starts a new session for `query`.
    ///
    /// The user message is appended immediately and never rolled back. Any session
    /// still in flight is abandoned; its remaining frames will be ignored.
    pub fn submit(
        &mut self,
        history: &mut ConversationHistory,
        query: &str,
        options: &RequestOptions,
    ) -> EngineResult<Submission> {
        let query = query.trim();
        ensure!(!query.is_empty(), EmptyQuerySnafu { stage: "submit-query" });

        if let Some(abandoned) = self.phase.active_session() {
            tracing::debug!(session_id = %abandoned, "abandoning in-flight session");
        }

        let session_id = self.next_session_id;
        // Reserve the next id right away so a resubmission never reuses this one.
        self.next_session_id = session_id.next();

        let request = ChatRequest {
            query: query.to_string(),
            history: history.to_turns(),
            thread_id: history.thread_id(),
            model: options.model,
            pro_search: options.pro_search,
        };
        history.push(ChatMessage::user(query));

        self.accumulator = AnswerAccumulator::new();
        self.pro_search = options.pro_search;
        self.phase = SessionPhase::Sending(session_id);

        tracing::debug!(
            session_id = %session_id,
            model = %options.model,
            pro_search = options.pro_search,
            history_len = request.history.len(),
            "session submitted"
        );

        Ok(Submission {
            session_id,
            request,
        })
    }

    /// Decodes one raw frame and applies it to the working message.
    pub fn handle_frame(
        &mut self,
        history: &mut ConversationHistory,
        session_id: StreamSessionId,
        raw: &str,
    ) -> SessionUpdate {
        if !self.phase.accepts(session_id) {
            tracing::trace!(session_id = %session_id, "ignoring frame from inactive session");
            return SessionUpdate::Ignored(IgnoreReason::StaleSession);
        }

        if let SessionPhase::Sending(_) = self.phase {
            tracing::debug!(session_id = %session_id, "first frame received; streaming");
            self.phase = SessionPhase::Streaming(session_id);
        }

        let event = match decode_frame(raw) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::trace!(session_id = %session_id, "keep-alive frame");
                return SessionUpdate::Ignored(IgnoreReason::KeepAlive);
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %error,
                    "dropping malformed frame"
                );
                return SessionUpdate::Ignored(IgnoreReason::MalformedFrame);
            }
        };

        match self.accumulator.apply(event) {
            Applied::Updated(snapshot) => SessionUpdate::Snapshot(snapshot),
            Applied::Dropped => SessionUpdate::Ignored(IgnoreReason::Rejected),
            Applied::Completed { message, thread_id } => {
                self.commit(history, session_id, message, thread_id)
            }
            Applied::Failed { message } => self.fail(history, session_id, message),
        }
    }

    /// Fails the live session after a connection or HTTP error.
    pub fn handle_transport_failure(
        &mut self,
        history: &mut ConversationHistory,
        session_id: StreamSessionId,
        detail: impl Into<String>,
    ) -> SessionUpdate {
        if !self.phase.accepts(session_id) {
            return SessionUpdate::Ignored(IgnoreReason::StaleSession);
        }

        let message = AssistantMessage::error(detail, self.accumulator.timeline().cloned());
        self.fail(history, session_id, message)
    }

    /// Called when the transport has no more frames for `session_id`.
    pub fn handle_stream_closed(
        &mut self,
        history: &mut ConversationHistory,
        session_id: StreamSessionId,
    ) -> SessionUpdate {
        self.handle_transport_failure(history, session_id, STREAM_CLOSED_DETAIL)
    }

    /// Replaces the history with a stored thread. Only allowed while idle.
    pub fn load_thread(
        &mut self,
        history: &mut ConversationHistory,
        thread: ThreadResponse,
    ) -> EngineResult<()> {
        if let Some(active) = self.phase.active_session() {
            return SessionBusySnafu {
                stage: "load-thread",
                session_id: active.get(),
            }
            .fail();
        }

        tracing::debug!(
            thread_id = %thread.thread_id,
            messages = thread.messages.len(),
            "loaded stored thread"
        );
        history.replace_with_thread(thread);
        Ok(())
    }

    fn commit(
        &mut self,
        history: &mut ConversationHistory,
        session_id: StreamSessionId,
        message: AssistantMessage,
        thread_id: Option<ThreadId>,
    ) -> SessionUpdate {
        tracing::info!(
            session_id = %session_id,
            content_len = message.content.len(),
            sources = message.sources.len(),
            "committing answer"
        );

        history.push(message.into());
        if let Some(thread_id) = thread_id {
            history.adopt_thread_id(thread_id);
        }
        self.finish();
        SessionUpdate::Committed
    }

    fn fail(
        &mut self,
        history: &mut ConversationHistory,
        session_id: StreamSessionId,
        message: AssistantMessage,
    ) -> SessionUpdate {
        let detail = message.content.clone();
        tracing::info!(session_id = %session_id, %detail, "session failed");

        history.push(message.into());
        self.finish();
        SessionUpdate::Failed { detail }
    }

    fn finish(&mut self) {
        self.phase = SessionPhase::Idle;
        self.pro_search = false;
    }
}
