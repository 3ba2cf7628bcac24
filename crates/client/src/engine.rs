//! Async driver that owns one conversation.
//!
//! Backend workers and stream readers run as tokio tasks, but every frame is funnelled
//! through a single inbox and applied by [`ChatEngine::next_update`], so the session
//! controller only ever sees one event at a time.

use std::sync::Arc;

use sift_core::{
    AssistantMessage, ChatMessage, ConversationHistory, RequestOptions, SessionController,
    SessionUpdate, StreamSessionId, ThreadId,
};
use snafu::ResultExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{
    AnswerBackend, ClientResult, EngineSnafu, FramePayload, FrameStream, StreamFrame,
    StreamHandle,
};

/// Read-only state handed to the render side after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineView {
    pub streaming: Option<AssistantMessage>,
    pub history: Vec<ChatMessage>,
    pub thread_id: Option<ThreadId>,
    pub is_streaming_pro_search: bool,
}

#[derive(Debug)]
enum EngineInput {
    Frame(StreamFrame),
    Closed(StreamSessionId),
}

struct ActiveStream {
    session_id: StreamSessionId,
    worker_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

pub struct ChatEngine {
    backend: Arc<dyn AnswerBackend>,
    controller: SessionController,
    history: ConversationHistory,
    options: RequestOptions,
    inbox_tx: mpsc::UnboundedSender<EngineInput>,
    inbox_rx: mpsc::UnboundedReceiver<EngineInput>,
    active_stream: Option<ActiveStream>,
    view_tx: watch::Sender<EngineView>,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn AnswerBackend>, options: RequestOptions) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(EngineView::default());
        Self {
            backend,
            controller: SessionController::new(),
            history: ConversationHistory::new(),
            options,
            inbox_tx,
            inbox_rx,
            active_stream: None,
            view_tx,
        }
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    /// Mode flags for the next submission; an in-flight session keeps its own.
    pub fn set_options(&mut self, options: RequestOptions) {
        self.options = options;
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_idle(&self) -> bool {
        self.controller.is_idle()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> EngineView {
        self.view_tx.borrow().clone()
    }

    /// Starts answering `query`, abandoning any session still in flight.
    pub fn submit(&mut self, query: &str) -> ClientResult<StreamSessionId> {
        let submission = self
            .controller
            .submit(&mut self.history, query, &self.options)
            .context(EngineSnafu {
                stage: "submit-query",
            })?;
        // Cancel only after the controller accepted the query so a rejected submit
        // leaves the running session alone.
        self.cancel_active_stream();

        let session_id = submission.session_id;
        match self.backend.stream_chat(session_id, submission.request) {
            Ok(handle) => self.spawn_stream_pipeline(handle),
            Err(error) => {
                tracing::error!(
                    session_id = %session_id,
                    backend = %self.backend.name(),
                    error = %error,
                    "failed to start answer stream"
                );
                self.controller
                    .handle_transport_failure(&mut self.history, session_id, error.to_string());
            }
        }

        self.publish();
        Ok(session_id)
    }

    /// Replaces the conversation with a stored thread. Fails while a session is active.
    pub async fn load_thread(&mut self, thread_id: ThreadId) -> ClientResult<()> {
        let thread = self.backend.fetch_thread(thread_id).await?;
        self.controller
            .load_thread(&mut self.history, thread)
            .context(EngineSnafu {
                stage: "load-thread",
            })?;
        self.publish();
        Ok(())
    }

    /// Waits for and applies the next frame. Returns `None` once no session is active.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        if self.controller.is_idle() {
            return None;
        }

        let input = self.inbox_rx.recv().await?;
        let update = self.apply_input(input);
        self.publish();
        Some(update)
    }

    /// Drives the active session to completion and returns every update it produced.
    pub async fn run_until_idle(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    fn apply_input(&mut self, input: EngineInput) -> SessionUpdate {
        let (session_id, update) = match input {
            EngineInput::Frame(StreamFrame {
                session_id,
                payload: FramePayload::Data(raw),
            }) => (
                session_id,
                self.controller
                    .handle_frame(&mut self.history, session_id, &raw),
            ),
            EngineInput::Frame(StreamFrame {
                session_id,
                payload: FramePayload::TransportError(detail),
            }) => (
                session_id,
                self.controller
                    .handle_transport_failure(&mut self.history, session_id, detail),
            ),
            EngineInput::Closed(session_id) => (
                session_id,
                self.controller
                    .handle_stream_closed(&mut self.history, session_id),
            ),
        };

        if matches!(update, SessionUpdate::Committed | SessionUpdate::Failed { .. })
            && self
                .active_stream
                .as_ref()
                .is_some_and(|active| active.session_id == session_id)
        {
            // Tasks are left to wind down on their own; their leftovers are stale now.
            self.active_stream = None;
        }

        update
    }

    fn spawn_stream_pipeline(&mut self, handle: StreamHandle) {
        let session_id = handle.stream.session_id();
        let worker_task = tokio::spawn(handle.worker);
        let reader_task =
            tokio::spawn(Self::forward_frames(handle.stream, self.inbox_tx.clone()));

        self.active_stream = Some(ActiveStream {
            session_id,
            worker_task,
            reader_task,
        });
    }

    async fn forward_frames(
        mut stream: FrameStream,
        inbox_tx: mpsc::UnboundedSender<EngineInput>,
    ) {
        let session_id = stream.session_id();
        while let Some(frame) = stream.recv().await {
            if inbox_tx.send(EngineInput::Frame(frame)).is_err() {
                return;
            }
        }
        let _ = inbox_tx.send(EngineInput::Closed(session_id));
    }

    fn cancel_active_stream(&mut self) {
        let Some(active_stream) = self.active_stream.take() else {
            return;
        };

        tracing::debug!(session_id = %active_stream.session_id, "cancelling answer stream");
        // Aborting the reader drops its FrameStream, which signals the worker to stop.
        active_stream.reader_task.abort();
    }

    fn publish(&self) {
        self.view_tx.send_replace(EngineView {
            streaming: self.controller.snapshot(),
            history: self.history.messages().to_vec(),
            thread_id: self.history.thread_id(),
            is_streaming_pro_search: self.controller.is_streaming_pro_search(),
        });
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        if let Some(active_stream) = self.active_stream.take() {
            active_stream.reader_task.abort();
            active_stream.worker_task.abort();
        }
    }
}
