use std::sync::Arc;

mod backend;
mod engine;
mod http;
pub mod settings;

pub use backend::{
    AnswerBackend, BackendWorker, BoxFuture, ClientError, ClientResult, FramePayload,
    FrameStream, StreamFrame, StreamHandle, make_frame_stream,
};
pub use engine::{ChatEngine, EngineView};
pub use http::{HTTP_BACKEND_NAME, HttpBackend, HttpBackendConfig};
pub use settings::{ChatSettings, SettingsStore};

pub fn create_backend(settings: &ChatSettings) -> ClientResult<Arc<dyn AnswerBackend>> {
    let config = HttpBackendConfig::from_settings(settings);
    Ok(Arc::new(HttpBackend::new(config)?))
}

/// Builds an engine talking to the backend described by `settings`.
pub fn create_engine(settings: &ChatSettings) -> ClientResult<ChatEngine> {
    let backend = create_backend(settings)?;
    Ok(ChatEngine::new(backend, settings.request_options()))
}
