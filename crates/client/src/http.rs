use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use sift_core::{ChatRequest, StreamSessionId, ThreadId, ThreadResponse};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};
use tokio::time::error::Elapsed;

use crate::backend::{
    AnswerBackend, BackendWorker, BoxFuture, ClientResult, DecodeResponseSnafu, HttpClientSnafu,
    MissingBaseUrlSnafu, ResponseStatusSnafu, SendRequestSnafu, StreamFrame, StreamHandle,
    make_frame_stream,
};
use crate::settings::ChatSettings;

pub const HTTP_BACKEND_NAME: &str = "http";

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub stream_idle_timeout: Option<Duration>,
}

impl HttpBackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            stream_idle_timeout: None,
        }
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = Some(timeout);
        self
    }

    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            stream_idle_timeout: settings.stream_idle_timeout(),
            ..Self::new(&settings.base_url)
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Talks to the answer service over HTTP, reading answers as server-sent events.
pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> ClientResult<Self> {
        ensure!(
            !config.base_url.is_empty(),
            MissingBaseUrlSnafu {
                stage: "http-backend-new",
            }
        );

        let client = reqwest::Client::builder().build().context(HttpClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    async fn open_stream(
        client: &reqwest::Client,
        url: &str,
        request: &ChatRequest,
    ) -> ClientResult<reqwest::Response> {
        let response = client
            .post(url)
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE))
            .json(request)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-chat-request",
                url: url.to_string(),
            })?;

        Self::ensure_success(response, "chat-http-status").await
    }

    async fn ensure_success(
        response: reqwest::Response,
        stage: &'static str,
    ) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                tracing::debug!(error = %error, "failed to read error response body");
                String::new()
            }
        };

        ResponseStatusSnafu {
            stage,
            status: status.as_u16(),
            body,
        }
        .fail()
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        url: String,
        idle_timeout: Option<Duration>,
        session_id: StreamSessionId,
        request: ChatRequest,
        frame_tx: mpsc::UnboundedSender<StreamFrame>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let opening =
            within_idle_timeout(idle_timeout, Self::open_stream(&client, &url, &request));
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(
                    session_id = %session_id,
                    "answer stream cancelled before it opened"
                );
                return;
            }
            opened = opening => opened,
        };

        let response = match opened {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                tracing::error!(
                    session_id = %session_id,
                    url = %url,
                    error = %error,
                    "failed to open answer stream"
                );
                let _ = frame_tx.send(StreamFrame::transport_error(session_id, error.to_string()));
                return;
            }
            Err(_) => {
                send_idle_failure(&frame_tx, session_id, idle_timeout);
                return;
            }
        };

        let events = response.bytes_stream().eventsource();
        let mut events = std::pin::pin!(events);

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(session_id = %session_id, "answer stream cancelled");
                    break;
                }
                next_event = within_idle_timeout(idle_timeout, events.next()) => {
                    match next_event {
                        Ok(Some(Ok(event))) => {
                            if event.data.trim().is_empty() {
                                continue;
                            }
                            if frame_tx.send(StreamFrame::data(session_id, event.data)).is_err() {
                                return;
                            }
                        }
                        Ok(Some(Err(source))) => {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %source,
                                "answer stream transport failed"
                            );
                            let _ = frame_tx.send(StreamFrame::transport_error(
                                session_id,
                                format!("answer stream transport failed: {source}"),
                            ));
                            break;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            send_idle_failure(&frame_tx, session_id, idle_timeout);
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_thread_inner(&self, thread_id: ThreadId) -> ClientResult<ThreadResponse> {
        let url = self.config.endpoint(&format!("thread/{thread_id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-thread-request",
                url: url.clone(),
            })?;

        let response = Self::ensure_success(response, "thread-http-status").await?;
        response.json::<ThreadResponse>().await.context(DecodeResponseSnafu {
            stage: "decode-thread-response",
        })
    }
}

/// Bounds `future` by the idle timeout, covering both the request and each body event.
async fn within_idle_timeout<F: Future>(
    idle_timeout: Option<Duration>,
    future: F,
) -> Result<F::Output, Elapsed> {
    match idle_timeout {
        Some(timeout) => tokio::time::timeout(timeout, future).await,
        None => Ok(future.await),
    }
}

fn send_idle_failure(
    frame_tx: &mpsc::UnboundedSender<StreamFrame>,
    session_id: StreamSessionId,
    idle_timeout: Option<Duration>,
) {
    let waited_ms = idle_timeout.map(|timeout| timeout.as_millis()).unwrap_or_default();
    tracing::warn!(session_id = %session_id, waited_ms, "answer stream went idle");
    let _ = frame_tx.send(StreamFrame::transport_error(
        session_id,
        format!("answer stream idle for {waited_ms} ms"),
    ));
}

impl AnswerBackend for HttpBackend {
    fn name(&self) -> &str {
        HTTP_BACKEND_NAME
    }

    fn stream_chat(
        &self,
        session_id: StreamSessionId,
        request: ChatRequest,
    ) -> ClientResult<StreamHandle> {
        let (frame_tx, stream, cancel_rx) = make_frame_stream(session_id);
        let worker: BackendWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.endpoint("chat"),
            self.config.stream_idle_timeout,
            session_id,
            request,
            frame_tx,
            cancel_rx,
        ));

        Ok(StreamHandle { stream, worker })
    }

    fn fetch_thread<'a>(
        &'a self,
        thread_id: ThreadId,
    ) -> BoxFuture<'a, ClientResult<ThreadResponse>> {
        Box::pin(self.fetch_thread_inner(thread_id))
    }
}
