mod client;
mod error;
mod export;
mod options;
mod orchestrator;
mod session;
mod state;
mod stream;
mod text;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use export::{BatchExportRequest, ExportRequest};
use options::{AnalysisSettings, AngleSpec, ReasoningEffort, StreamMode, MAX_INPUT_CHARS};
use orchestrator::UploadFile;
use session::types::{AngleStatus, Channel, DocumentStatus};
use session::Session;
use state::AppState;

/// Stream multi-angle analyses of documents from a paper-lens server.
#[derive(Debug, Parser)]
#[command(name = "paper-lens", version)]
struct Cli {
    /// Documents to analyze. Without any, the previous session is shown.
    files: Vec<PathBuf>,

    /// How the server orders angles within one document
    #[arg(long, value_enum, default_value_t = StreamMode::Sequential)]
    mode: StreamMode,

    /// Advisory cap on concurrent angle streams per document (1-8)
    #[arg(long, default_value_t = 3)]
    parallel_limit: u8,

    /// Characters of document text sent to the model (2000-30000)
    #[arg(long, default_value_t = MAX_INPUT_CHARS)]
    max_input_chars: u32,

    /// Stream the model's reasoning trace
    #[arg(long)]
    reasoning: bool,

    #[arg(long, value_enum, default_value_t = ReasoningEffort::High)]
    effort: ReasoningEffort,

    /// Ask for a consolidated report after all angles
    #[arg(long)]
    final_report: bool,

    /// Extra instruction appended to every angle
    #[arg(long)]
    prompt: Option<String>,

    /// JSON file with `[{"title", "prompt"}]` angle specs
    #[arg(long, env = "PAPER_LENS_ANGLES")]
    angles: Option<PathBuf>,

    /// Export finished documents to docx when done
    #[arg(long)]
    export: bool,

    /// Discard the saved session before doing anything else
    #[arg(long)]
    clear: bool,
}

impl Cli {
    fn settings(&self) -> Result<AnalysisSettings> {
        let angles = match &self.angles {
            Some(path) => options::load_angle_specs(path)?,
            None => AngleSpec::defaults(),
        };
        Ok(AnalysisSettings {
            angles,
            user_prompt: self.prompt.clone(),
            max_input_chars: self.max_input_chars,
            stream_mode: self.mode,
            parallel_limit: self.parallel_limit,
            enable_reasoning: self.reasoning,
            reasoning_effort: self.effort,
            enable_final_report: self.final_report,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let state = AppState::init().await?;

    if cli.clear {
        state.orchestrator.clear().await;
        info!("Saved session cleared");
    }

    // Restore before any task exists.
    let restored = state.orchestrator.restore().await;
    if cli.files.is_empty() {
        if restored {
            info!("{}", state.session.status().await.message);
            print_session(&state.session).await;
            if cli.export {
                export_documents(&state).await;
            }
        } else if !cli.clear {
            info!("No saved session; pass documents to analyze");
        }
        return Ok(());
    }

    let files = cli
        .files
        .iter()
        .map(|p| UploadFile::read(p))
        .collect::<Result<Vec<_>>>()?;
    let settings = cli.settings()?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, cancelling analysis (Ctrl-C again to exit)");
        orchestrator.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let render = tokio::spawn(render_loop(state.orchestrator.session().clone()));
    let result = state.orchestrator.start(files, &settings).await;
    render.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    if summary.succeeded == 0 && !summary.cancelled {
        error!(total = summary.total, "{}", summary.message);
    } else {
        info!(total = summary.total, "{}", summary.message);
    }

    print_session(&state.session).await;
    if cli.export && summary.succeeded > 0 {
        export_documents(&state).await;
    }
    Ok(())
}

/// Log progress once per coalesced frame, only when something visible moved.
async fn render_loop(session: Arc<Session>) {
    let mut last = String::new();
    loop {
        let frame = session.render().next_frame().await;
        let progress = session.progress().await;
        let status = session.status().await;
        let line = if progress.documents_total > 1 {
            format!("{} | {}", status.message, progress.describe())
        } else {
            format!(
                "{} | {}/{} angles",
                status.message, progress.angles_done, progress.angles_total
            )
        };
        if line != last {
            if status.is_error {
                warn!(frame, "{}", line);
            } else {
                info!(frame, "{}", line);
            }
            last = line;
        }
    }
}

async fn print_session(session: &Session) {
    for doc in &session.documents().await {
        let cancelled = orchestrator::is_cancellation_message(doc.error_message.as_deref());
        let status = match doc.status {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Analyzing => "analyzing",
            DocumentStatus::Done => "done",
            DocumentStatus::Error if cancelled => "cancelled",
            DocumentStatus::Error => "failed",
        };
        println!("\n# {} ({}) [{}]", doc.title, doc.display_name, status);
        if let Some(message) = &doc.error_message {
            println!("> {}", message);
        }

        for angle in &doc.angles {
            let mark = match angle.status {
                AngleStatus::Pending => "·",
                AngleStatus::Streaming => "…",
                AngleStatus::Done => "✓",
                AngleStatus::Error => "✕",
            };
            match angle.elapsed() {
                Some(elapsed) => println!(
                    "\n## {} {} ({})",
                    mark,
                    angle.name,
                    text::format_elapsed(elapsed)
                ),
                None => println!("\n## {} {}", mark, angle.name),
            }
            let reasoning = session
                .content(&doc.id, &Channel::angle_reasoning(&angle.name))
                .await;
            if !reasoning.is_empty() {
                for line in reasoning.lines() {
                    println!("> {}", line);
                }
            }
            let body = session.content(&doc.id, &Channel::angle(&angle.name)).await;
            if !body.is_empty() {
                println!("{}", text::clean_text(&body));
            }
        }

        let report = session.content(&doc.id, &Channel::Final).await;
        if !report.is_empty() {
            println!("\n## Consolidated report\n{}", text::clean_text(&report));
        }
    }
}

async fn export_documents(state: &AppState) {
    let (documents, content) = state.session.snapshot().await;
    let requests: Vec<ExportRequest> = documents
        .iter()
        .filter(|d| d.status == DocumentStatus::Done)
        .map(|d| ExportRequest::from_document(d, &content))
        .filter(|r| !r.is_empty())
        .collect();

    let result = match requests.len() {
        0 => {
            warn!("Nothing to export");
            return;
        }
        1 => state.client.export(&requests[0]).await,
        _ => {
            state
                .client
                .export_batch(&BatchExportRequest { papers: requests })
                .await
        }
    };
    match result {
        Ok(artifact) => info!(
            filename = %artifact.filename,
            path = %artifact.file_path,
            url = %artifact.download_url,
            "Export ready"
        ),
        Err(e) => error!("Export failed: {:#}", e),
    }
}
