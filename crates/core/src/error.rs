use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("stream frame is not a valid event envelope: {source} (frame: {excerpt})"))]
    MalformedFrame {
        stage: &'static str,
        excerpt: String,
        source: serde_json::Error,
    },
    #[snafu(display("payload for event '{kind}' does not match its schema: {source}"))]
    MalformedPayload {
        stage: &'static str,
        kind: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("step {step} is outside the announced plan of {len} steps"))]
    StepOutOfRange {
        stage: &'static str,
        step: usize,
        len: usize,
    },
    #[snafu(display("step {step} was reported before any query plan was announced"))]
    NoActivePlan { stage: &'static str, step: usize },
    #[snafu(display("cannot submit an empty query"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("session {session_id} is still streaming"))]
    SessionBusy { stage: &'static str, session_id: u64 },
    #[snafu(display("chat model '{raw}' is not supported"))]
    UnknownModel { stage: &'static str, raw: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
