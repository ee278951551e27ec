use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use rulebook_ingest::{
    logging,
    orchestrator::{
        FileInput, HttpBackend, IngestionOrchestrator, OrchestratorSettings, UploadForm,
        UploadState,
    },
    runner::{BoundedRunner, RetryPolicy, Scheduling},
};

#[derive(Parser)]
#[command(
    name = "rulebook-upload",
    about = "Split a rulebook PDF, extract every page, and ingest it through the server"
)]
struct Cli {
    /// Base URL of the ingestion server.
    #[arg(long, default_value = "http://127.0.0.1:4100")]
    server: String,
    /// Game title.
    #[arg(long)]
    title: String,
    /// Publication year.
    #[arg(long)]
    year: Option<i32>,
    /// Rulebook PDF.
    #[arg(long)]
    document: PathBuf,
    /// Cover image (PNG, JPEG, WebP or GIF).
    #[arg(long)]
    thumbnail: PathBuf,
    /// Pages extracted in parallel.
    #[arg(long, default_value_t = 5)]
    concurrency: usize,
    /// Pages per ingestion request.
    #[arg(long, default_value_t = rulebook_ingest::orchestrator::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Attempts per page, including the first.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    /// Backoff unit in milliseconds; the wait after attempt `n` is `n` units.
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,
    /// `windowed` or `pooled`.
    #[arg(long, default_value = "windowed")]
    scheduling: Scheduling,
    /// Log debug output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_tracing(cli.verbose);

    let form = UploadForm {
        title: cli.title.clone(),
        year: cli.year,
        document: FileInput::read(&cli.document)
            .await
            .with_context(|| format!("Failed to read {}", cli.document.display()))?,
        thumbnail: FileInput::read(&cli.thumbnail)
            .await
            .with_context(|| format!("Failed to read {}", cli.thumbnail.display()))?,
    };

    let backend = HttpBackend::new(&cli.server).context("Failed to create server client")?;
    let orchestrator = IngestionOrchestrator::new(
        Arc::new(backend),
        OrchestratorSettings {
            extraction_runner: BoundedRunner::new(
                cli.concurrency,
                RetryPolicy {
                    max_attempts: cli.max_attempts,
                    base_delay: Duration::from_millis(cli.backoff_ms),
                },
                cli.scheduling,
            ),
            batch_size: cli.batch_size,
        },
    );

    let mut states = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            print_state(&state);
            if !state.is_busy() {
                break;
            }
        }
    });

    let outcome = orchestrator.run(&form).await;
    drop(orchestrator);
    let _ = printer.await;

    let outcome = outcome.context("Upload failed")?;
    println!(
        "Rulebook {} ingested as `{}` ({} pages)",
        outcome.rulebook_id, outcome.slug, outcome.page_count
    );
    Ok(())
}

fn print_state(state: &UploadState) {
    match state.percent() {
        Some(percent) => println!("[{percent:>3}%] {state}"),
        None => println!("{state}"),
    }
}
