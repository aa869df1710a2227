//! Command-line interface for corrag.
//!
//! Provides commands for asking questions, building and querying the
//! knowledge base, and inspecting recorded runs.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use uuid::Uuid;

use crate::adapters::{Embedder, EmbeddingClient};
use crate::config::ResolvedConfig;
use crate::context::AppContext;
use crate::core::{RunHandle, RunLog, RunRequest, WorkflowError};
use crate::domain::{RunOutcome, RunStatus, StepLabel, StreamFrame};
use crate::knowledge::{BuildOutcome, KnowledgeBase};

/// corrag - Self-correcting retrieval-augmented question answering
#[derive(Parser, Debug)]
#[command(name = "corrag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question
    Ask {
        /// The question to answer
        question: String,

        /// Generations allowed beyond the first
        #[arg(long)]
        max_retries: Option<u32>,

        /// How to print progress
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Do not record the run under the runs directory
        #[arg(long)]
        no_record: bool,
    },

    /// Build the knowledge base from documents
    Build {
        /// Files or directories (defaults to the configured sources)
        sources: Vec<PathBuf>,

        /// Drop the existing collection first
        #[arg(long)]
        force_rebuild: bool,
    },

    /// Show the chunks the knowledge base returns for a query
    Query {
        /// Query text
        text: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Progress output for `ask`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Progress on stderr, answer on stdout
    Text,

    /// Server-sent-events frames on stdout
    Sse,

    /// One JSON event per line on stdout
    Json,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ask {
                question,
                max_retries,
                format,
                no_record,
            } => ask(question, max_retries, format, !no_record).await,
            Commands::Build {
                sources,
                force_rebuild,
            } => build(&sources, force_rebuild).await,
            Commands::Query { text } => query(&text).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Run the workflow for one question, streaming its progress
async fn ask(
    question: String,
    max_retries: Option<u32>,
    format: OutputFormat,
    record: bool,
) -> Result<()> {
    let config = ResolvedConfig::load()?;
    let runs_dir = config.runs_dir();
    let ctx = AppContext::initialize(config).await?;

    if !ctx.workflow().has_retriever() {
        warn!("No knowledge base loaded; run `corrag build` to enable retrieval");
    }

    let mut request = RunRequest::new(question);
    if let Some(max_retries) = max_retries {
        request = request.with_max_retries(max_retries);
    }

    let log = if record {
        Some(RunLog::open(&runs_dir, request.run_id).await?)
    } else {
        None
    };

    let RunHandle {
        run_id,
        mut frames,
        task,
    } = ctx.workflow().spawn(request);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let (Some(log), Some(event)) = (&log, frame.event()) {
                    log.append(event).await?;
                }
                render(&frame, format)?;
            }
            _ = &mut ctrl_c => {
                eprintln!("\n[Run {} interrupted]", run_id);
                break;
            }
        }
    }

    // Dropping the receiver cancels a run that is still going
    drop(frames);

    match task.await.context("Run task panicked")? {
        Ok(report) => {
            if format == OutputFormat::Text {
                report_outcome(run_id, &report.outcome, report.state.loop_step());
            }
            Ok(())
        }
        Err(WorkflowError::Cancelled) => {
            eprintln!("[Run {} cancelled]", run_id);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("\n[Run {} failed: {}]", run_id, e);
            std::process::exit(1);
        }
    }
}

fn render(frame: &StreamFrame, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();

    match format {
        OutputFormat::Sse => {
            write!(stdout, "{}", frame.to_sse()?)?;
        }
        OutputFormat::Json => {
            if let Some(event) = frame.event() {
                writeln!(stdout, "{}", serde_json::to_string(event)?)?;
            }
        }
        OutputFormat::Text => {
            let Some(event) = frame.event() else {
                return Ok(());
            };
            match event.step {
                StepLabel::Final => writeln!(stdout, "{}", event.content)?,
                StepLabel::Generated => eprintln!(
                    "[{}] attempt {} -> {}",
                    event.step,
                    event.loop_step,
                    event.transition.as_deref().unwrap_or("?")
                ),
                StepLabel::Error => {}
                _ => eprintln!("[{}] {}", event.step, event.content),
            }
        }
    }

    stdout.flush()?;
    Ok(())
}

fn report_outcome(run_id: Uuid, outcome: &RunOutcome, attempts: u32) {
    match outcome {
        RunOutcome::Accepted { .. } => {
            eprintln!("\n[Run {} answered after {} attempt(s)]", run_id, attempts);
        }
        RunOutcome::RetriesExhausted { .. } => {
            eprintln!(
                "\n[Run {} stopped after {} attempts: answer could not be verified]",
                run_id, attempts
            );
        }
    }
}

/// Build (or rebuild) the knowledge base
async fn build(sources: &[PathBuf], force_rebuild: bool) -> Result<()> {
    let config = ResolvedConfig::load()?;
    let mut ctx = AppContext::initialize(config).await?;

    match ctx.rebuild_knowledge(sources, force_rebuild).await? {
        BuildOutcome::Built { documents, chunks } => {
            println!("Built knowledge base: {} documents, {} chunks", documents, chunks);
        }
        BuildOutcome::Loaded { chunks } => {
            println!("No new documents loaded; existing knowledge base has {} chunks", chunks);
        }
        BuildOutcome::Empty => {
            println!("No documents loaded and no existing knowledge base");
        }
    }

    println!("Location: {}", ctx.config().knowledge_db_path().display());
    Ok(())
}

/// Print the top chunks for a query
async fn query(text: &str) -> Result<()> {
    let config = ResolvedConfig::load()?;
    // Retrieval only needs the embedding service, not the chat model
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::from_settings(&config.embeddings)?);
    let (knowledge, _) =
        KnowledgeBase::open(&config.knowledge, &config.knowledge_db_path(), embedder).await?;

    let Some(knowledge) = knowledge else {
        anyhow::bail!("No knowledge base loaded; run `corrag build` first");
    };

    let chunks = knowledge.query(text).await?;
    if chunks.is_empty() {
        println!("No matching chunks");
        return Ok(());
    }

    for (rank, chunk) in chunks.iter().enumerate() {
        println!(
            "#{} score={:.3} source={}",
            rank + 1,
            chunk.score,
            chunk.document.source().unwrap_or("-")
        );
        println!("{}", chunk.document.excerpt(300));
        println!();
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let config = ResolvedConfig::load()?;
    let runs = RunLog::recent(&config.runs_dir(), limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<16} {:<18} {:<8}", "RUN ID", "ROUTE", "STATE", "ATTEMPTS");
    println!("{}", "-".repeat(82));

    for run in runs {
        println!(
            "{:<38} {:<16} {:<18} {:<8}",
            run.run_id,
            run.route.as_deref().unwrap_or("-"),
            status_label(&run.status),
            run.loop_step
        );
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let config = ResolvedConfig::load()?;
    let runs_dir = config.runs_dir();
    if !runs_dir.join(run_id.to_string()).exists() {
        anyhow::bail!("Run {} not found", run_id);
    }

    let log = RunLog::open(&runs_dir, run_id).await?;
    let summary = log
        .summary()
        .await?
        .with_context(|| format!("Run {} has no recorded events", run_id))?;

    println!("Run ID: {}", summary.run_id);
    println!("State: {}", status_label(&summary.status));
    if let RunStatus::Failed { error } = &summary.status {
        println!("Error: {}", error);
    }
    println!("Route: {}", summary.route.as_deref().unwrap_or("-"));
    println!("Started: {}", summary.started_at);
    if let Some(completed) = summary.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Steps: {}", summary.steps);
    println!("Generation attempts: {}", summary.loop_step);
    if let Some(answer) = &summary.answer {
        println!("\nAnswer:\n{}", answer);
    }

    Ok(())
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Finished { outcome } => outcome.as_str(),
        RunStatus::Failed { .. } => "failed",
    }
}

/// Show the resolved configuration
fn show_config() -> Result<()> {
    let config = ResolvedConfig::load()?;

    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Runs:           {}", config.runs_dir().display());
    println!("Knowledge base: {}", config.knowledge_db_path().display());
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&config).context("Failed to render configuration")?
    );

    Ok(())
}
