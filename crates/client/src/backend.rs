use std::future::Future;
use std::pin::Pin;

use sift_core::{ChatRequest, EngineError, StreamSessionId, ThreadId, ThreadResponse};
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("backend base URL is empty"))]
    MissingBaseUrl { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status}: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode backend response on `{stage}`, {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat engine rejected the request on `{stage}`: {source}"))]
    Engine {
        stage: &'static str,
        source: EngineError,
    },
}

/// One item pushed by a backend worker for a specific session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub session_id: StreamSessionId,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Raw event frame, handed to the decoder untouched.
    Data(String),
    /// Connection or HTTP failure; the worker stops after sending it.
    TransportError(String),
}

impl StreamFrame {
    pub fn data(session_id: StreamSessionId, raw: impl Into<String>) -> Self {
        Self {
            session_id,
            payload: FramePayload::Data(raw.into()),
        }
    }

    pub fn transport_error(session_id: StreamSessionId, detail: impl Into<String>) -> Self {
        Self {
            session_id,
            payload: FramePayload::TransportError(detail.into()),
        }
    }
}

/// Receiving side of one answer stream. Dropping it cancels the worker.
pub struct FrameStream {
    session_id: StreamSessionId,
    frames: mpsc::UnboundedReceiver<StreamFrame>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct StreamHandle {
    pub stream: FrameStream,
    pub worker: BackendWorker,
}

impl FrameStream {
    pub(crate) fn new(
        session_id: StreamSessionId,
        frames: mpsc::UnboundedReceiver<StreamFrame>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            session_id,
            frames,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn session_id(&self) -> StreamSessionId {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.frames.recv().await
    }

}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Upstream answer service. Implementations own all transport I/O.
pub trait AnswerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the answer stream for `request`; frames are tagged with `session_id`.
    fn stream_chat(
        &self,
        session_id: StreamSessionId,
        request: ChatRequest,
    ) -> ClientResult<StreamHandle>;

    fn fetch_thread<'a>(
        &'a self,
        thread_id: ThreadId,
    ) -> BoxFuture<'a, ClientResult<ThreadResponse>>;
}

/// Wires the frame channel and cancel signal shared by a worker and its `FrameStream`.
pub fn make_frame_stream(
    session_id: StreamSessionId,
) -> (
    mpsc::UnboundedSender<StreamFrame>,
    FrameStream,
    oneshot::Receiver<()>,
) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        frame_tx,
        FrameStream::new(session_id, frame_rx, cancel_tx),
        cancel_rx,
    )
}
