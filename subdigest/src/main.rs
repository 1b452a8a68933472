//! Subdigest CLI - download subtitles and generate study material.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use subdigest::clients::{BilibiliSourceClient, OpenAiCompatClient};
use subdigest::config::{AppConfig, ModelCatalog, SourceCredentials};
use subdigest::core::{TaskRequest, TaskState, TaskStatus};
use subdigest::events::LoggingEventSink;
use subdigest::observability::{init_tracing, LogFormat};
use subdigest::service::DigestService;
use subdigest::utils::elapsed_ms;

#[derive(Parser)]
#[command(
    name = "subdigest",
    version,
    about = "Download video subtitles and turn them into study material",
    after_help = "EXAMPLES:\n  \
                  subdigest run https://www.bilibili.com/video/BV1xx411c7mD\n  \
                  subdigest run --all-parts --profile deepseek URL1 URL2\n  \
                  subdigest models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Application settings file
    #[arg(long, global = true, default_value = "config/app_config.json")]
    config: PathBuf,

    /// Log format (text or json); overrides the settings file
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one or more videos
    Run {
        /// Video URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Model profile name (defaults to the last selected one)
        #[arg(short, long)]
        profile: Option<String>,

        /// Output root directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Folder name under the output directory instead of the video title
        #[arg(long)]
        folder: Option<String>,

        /// Process every part of multi-part videos
        #[arg(long)]
        all_parts: bool,

        /// Status polling interval in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },

    /// List configured model profiles
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_init(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let level = if cli.verbose { "debug" } else { "info" };
    init_tracing(cli.log_format.unwrap_or(config.log_format), level)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Models => list_models(&config),
        Commands::Run {
            urls,
            profile,
            output,
            folder,
            all_parts,
            poll_ms,
        } => {
            let options = RunOptions {
                profile,
                output,
                folder,
                all_parts,
                poll: Duration::from_millis(poll_ms.max(10)),
            };
            run(&config, urls, options).await
        }
    }
}

struct RunOptions {
    profile: Option<String>,
    output: Option<PathBuf>,
    folder: Option<String>,
    all_parts: bool,
    poll: Duration,
}

fn list_models(config: &AppConfig) -> Result<()> {
    let catalog = ModelCatalog::load(&config.models_file)?;
    if catalog.is_empty() {
        println!("No models configured in {}", config.models_file.display());
        return Ok(());
    }
    for (i, model) in catalog.models.iter().enumerate() {
        let marker = if model.name == config.last_selected_model { "*" } else { " " };
        println!("{marker} [{i}] {} ({} @ {})", model.name, model.model_name, model.api_base);
    }
    Ok(())
}

async fn run(config: &AppConfig, urls: Vec<String>, options: RunOptions) -> Result<()> {
    let catalog = ModelCatalog::load(&config.models_file)?;
    let wanted = options
        .profile
        .as_deref()
        .or(Some(config.last_selected_model.as_str()));
    let profile = catalog.resolve(wanted, None)?.name.clone();
    let credentials = SourceCredentials::load(&config.cookies_file)?;

    let service = DigestService::builder()
        .config(config.engine_config())
        .source(Arc::new(BilibiliSourceClient::new(credentials)))
        .enrichment(Arc::new(OpenAiCompatClient::new(catalog)))
        .event_sink(Arc::new(LoggingEventSink::debug()))
        .build()?;

    let output = options
        .output
        .unwrap_or_else(|| config.output_directory.clone());
    let requests = urls.iter().map(|url| {
        let mut request = TaskRequest::new(url.as_str(), output.clone(), profile.as_str())
            .with_all_parts(options.all_parts || config.download_all_parts);
        if let Some(folder) = &options.folder {
            request = request.with_folder_name(folder.as_str());
        }
        request
    });
    let ids = service.submit_batch(requests)?;
    info!(tasks = ids.len(), %profile, "Submitted");

    let statuses = tokio::select! {
        done = service.watch(&ids, options.poll, print_progress) => done?,
        _ = tokio::signal::ctrl_c() => {
            warn!(stopping = service.stop_all(), "Interrupted, stopping tasks");
            service.watch(&ids, options.poll, print_progress).await?
        }
    };
    service.shutdown().await;

    let mut failed = 0usize;
    for status in &statuses {
        let name = status.title.as_deref().unwrap_or(&status.resource);
        let took = match (status.started_at, status.completed_at) {
            (Some(start), Some(end)) => format!(" ({:.1}s)", elapsed_ms(&start, &end) as f64 / 1000.0),
            _ => String::new(),
        };
        println!("[{}] {name}: {}{took}", status.state, status.message);
        for path in status.results.paths() {
            println!("    {}", path.display());
        }
        if status.state != TaskState::Completed {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} task(s) did not complete", statuses.len());
    }
    Ok(())
}

fn print_progress(status: &TaskStatus) {
    let name = status.title.as_deref().unwrap_or(&status.resource);
    println!("[{}] {name}: {}", status.state, status.message);
}
