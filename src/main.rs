use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use pr_reconciler::config::Config;
use pr_reconciler::dispatch::{self, Router};
use pr_reconciler::executor::Executor;
use pr_reconciler::platform;
use pr_reconciler::policy::security;
use pr_reconciler::pr::{self, PayloadError, Platform};
use pr_reconciler::report;
use pr_reconciler::worker::{self, GitRunner};

/// PR Reconciler: applies labels, statuses, comments and checks to pull
/// requests in response to GitHub and GitLab webhook deliveries.
#[derive(Parser, Debug)]
#[command(name = "pr-reconciler", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one webhook delivery.
    Process {
        /// Event name from the `X-GitHub-Event` / `X-Gitlab-Event` header
        #[arg(short, long)]
        event: String,

        /// Path to the JSON payload, or `-` for stdin
        #[arg(short, long)]
        payload: PathBuf,

        #[arg(long, value_enum, default_value_t = PlatformArg::Github)]
        platform: PlatformArg,

        /// Configuration file (defaults to .pr-reconciler.toml in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Delivery ID, used for log correlation
        #[arg(long)]
        delivery: Option<String>,

        /// Print the planned actions without applying them
        #[arg(long)]
        dry_run: bool,

        /// Optional output file path for a markdown report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a check command. Exits with status 1 if it is rejected.
    CheckCommand {
        command: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PlatformArg {
    Github,
    Gitlab,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Github => Platform::GitHub,
            PlatformArg::Gitlab => Platform::GitLab,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Process {
            event,
            payload,
            platform,
            config,
            delivery,
            dry_run,
            output,
        } => {
            let delivery_id = delivery.clone().unwrap_or_else(|| "-".to_string());
            let span = info_span!("delivery", id = %delivery_id, event = %event);
            let request = ProcessRequest {
                event: &event,
                payload: &payload,
                platform: platform.into(),
                config: config.as_deref(),
                delivery,
                dry_run,
                output: output.as_deref(),
            };
            process(request).instrument(span).await
        }
        Command::CheckCommand { command } => {
            let verdict = security::validate(&command);
            println!("{verdict}");
            if !verdict.is_safe {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

struct ProcessRequest<'a> {
    event: &'a str,
    payload: &'a Path,
    platform: Platform,
    config: Option<&'a Path>,
    delivery: Option<String>,
    dry_run: bool,
    output: Option<&'a Path>,
}

async fn process(request: ProcessRequest<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let body = read_payload(request.payload)?;

    let event = match pr::parse_event(request.platform, request.event, &body) {
        Ok(event) => event,
        Err(err @ (PayloadError::UnsupportedEvent { .. } | PayloadError::NotAPullRequest(_))) => {
            info!(reason = %err, "ignoring delivery");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    info!(repository = %event.repository, number = event.number, kind = %event.kind, "decoded delivery");

    info!("loading configuration");
    let config = match request.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let resolved = dispatch::resolve_repository(&config, &event)?;
    let client = platform::client_for(&resolved, &config.transport)?;

    let router = Router::new(&resolved.settings, config.bot_user.as_deref());
    let plan = dispatch::plan_delivery(&router, client.as_ref(), &event).await?;

    if request.dry_run {
        report::print_plan(&plan);
        return Ok(());
    }

    let (queue, jobs) = worker::spawn(GitRunner::new(&config.worker), config.worker.queue_capacity);
    let executor = Executor::new(client, Some(queue));
    let mut execution = executor.execute(&plan).await;
    drop(executor);

    info!("waiting for background jobs");
    execution.jobs = jobs.await?;
    execution.delivery = request.delivery;

    if execution.has_failures() {
        warn!(failed = execution.failed(), "delivery completed with failures");
    }
    report::output(&execution, request.output)?;
    info!(
        applied = execution.applied(),
        unchanged = execution.unchanged(),
        skipped = execution.skipped(),
        "done"
    );

    Ok(())
}

fn read_payload(path: &Path) -> std::io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin().read_to_end(&mut body)?;
        Ok(body)
    } else {
        std::fs::read(path)
    }
}
