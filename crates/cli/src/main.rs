use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use sift_client::{ChatEngine, ChatSettings, ClientError, SettingsStore, create_engine};
use sift_core::{ChatMessage, ChatModel, SessionUpdate, ThreadId};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod render;

use render::{DeltaPrinter, write_details, write_history};

/// sift - ask a question and stream a cited answer
#[derive(Debug, Parser)]
#[command(name = "sift", version, about, long_about = None)]
struct Cli {
    /// Question to ask; starts an interactive prompt when omitted
    query: Option<String>,

    /// Use expert search with a multi-step plan
    #[arg(long)]
    pro: bool,

    /// Answer model, e.g. gpt-4o or llama3
    #[arg(long, value_name = "MODEL")]
    model: Option<ChatModel>,

    /// Answer service URL (overrides settings)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Settings file to load instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Continue a stored conversation thread
    #[arg(long, value_name = "ID")]
    thread: Option<i64>,

    /// Log filter (overrides RUST_LOG), e.g. debug or sift_core=trace
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("answer client failed on `{stage}`"))]
    Client {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to read input on `{stage}`"))]
    ReadInput {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`"))]
    WriteOutput {
        stage: &'static str,
        source: io::Error,
    },
}

type CliResult<T> = Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    let mut settings = apply_overrides(store.settings().clone(), &cli);
    tracing::debug!(
        config_path = ?store.config_path(),
        base_url = %settings.base_url,
        model = %settings.model,
        pro_mode = settings.pro_mode,
        "settings resolved"
    );

    let mut engine = create_engine(&settings).context(ClientSnafu {
        stage: "create-engine",
    })?;
    let mut out = io::stdout().lock();

    if let Some(thread_id) = cli.thread {
        engine
            .load_thread(ThreadId::new(thread_id))
            .await
            .context(ClientSnafu {
                stage: "load-thread",
            })?;
        write_history(&mut out, engine.history().messages()).context(WriteOutputSnafu {
            stage: "write-thread",
        })?;
    }

    match cli.query {
        Some(query) => ask(&mut engine, &query, &mut out).await,
        None => run_repl(&mut engine, &mut settings, &mut out).await,
    }
}

fn init_tracing(log_level: Option<&str>) {
    // Logs go to stderr so they never interleave with the answer on stdout.
    let filter = match log_level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn apply_overrides(mut settings: ChatSettings, cli: &Cli) -> ChatSettings {
    if let Some(base_url) = &cli.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if cli.pro {
        settings.pro_mode = true;
    }
    settings.normalized()
}

async fn run_repl(
    engine: &mut ChatEngine,
    settings: &mut ChatSettings,
    out: &mut impl Write,
) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        write!(out, "{}> ", mode_label(settings))
            .and_then(|_| out.flush())
            .context(WriteOutputSnafu {
                stage: "write-prompt",
            })?;

        let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-query-line",
        })?
        else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/pro" => {
                settings.toggle_pro_mode();
                engine.set_options(settings.request_options());
            }
            "/local" => {
                settings.toggle_local_mode();
                engine.set_options(settings.request_options());
            }
            query => ask(engine, query, out).await?,
        }
    }

    Ok(())
}

fn mode_label(settings: &ChatSettings) -> String {
    let mode = if settings.request_options().pro_search {
        " pro"
    } else {
        ""
    };
    format!("{}{mode}", settings.model)
}

async fn ask(engine: &mut ChatEngine, query: &str, out: &mut impl Write) -> CliResult<()> {
    engine.submit(query).context(ClientSnafu {
        stage: "submit-query",
    })?;

    let mut printer = DeltaPrinter::default();
    while let Some(update) = engine.next_update().await {
        match update {
            SessionUpdate::Snapshot(message) => {
                printer
                    .write_delta(out, &message.content)
                    .context(WriteOutputSnafu {
                        stage: "write-answer-delta",
                    })?;
            }
            SessionUpdate::Committed => {
                let Some(answer) = engine.history().last().and_then(ChatMessage::as_assistant)
                else {
                    continue;
                };
                printer
                    .write_delta(out, &answer.content)
                    .and_then(|_| writeln!(out))
                    .and_then(|_| write_details(out, answer))
                    .context(WriteOutputSnafu {
                        stage: "write-answer",
                    })?;
            }
            SessionUpdate::Failed { detail } => {
                tracing::debug!(%detail, "answer failed");
                writeln!(out, "\nerror: {detail}").context(WriteOutputSnafu {
                    stage: "write-error",
                })?;
            }
            SessionUpdate::Ignored(reason) => {
                tracing::trace!(?reason, "frame ignored");
            }
        }
    }

    Ok(())
}
