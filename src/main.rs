//! CLI entry point for batchmail.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use batchmail::providers::{GraphMailer, GRAPH_API_URL};
use batchmail::{
    input, report, BatchOptions, BatchSender, BatchSummary, CredentialSession, GraphConfig,
    MailError, MarkupPreprocessor, DEFAULT_AUTHORITY_URL, GRAPH_DEFAULT_SCOPE,
};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const EXAMPLES: &str = "\
Examples:
  batchmail -r recipients.txt -t template.html -s \"Subject Line\" \\
    --tenant-id YOUR_TENANT_ID \\
    --client-id YOUR_CLIENT_ID \\
    --client-secret YOUR_CLIENT_SECRET \\
    --shared-mailbox shared@company.com

  batchmail -r recipients.json -t template.html -s \"Subject Line\" --config config.json";

#[derive(Parser, Debug)]
#[command(name = "batchmail", version)]
#[command(about = "Send an HTML email to each recipient individually through Microsoft Graph")]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// File of recipient addresses (one per line, or a JSON array)
    #[arg(short = 'r', long)]
    recipients: PathBuf,

    /// HTML email template file
    #[arg(short = 't', long)]
    template: PathBuf,

    /// Email subject line
    #[arg(short = 's', long)]
    subject: String,

    /// JSON config file with tenant_id, client_id, client_secret, shared_mailbox
    #[arg(long, conflicts_with_all = ["tenant_id", "client_id", "client_secret", "shared_mailbox"])]
    config: Option<PathBuf>,

    /// Azure AD tenant ID
    #[arg(long)]
    tenant_id: Option<String>,

    /// Application (client) ID
    #[arg(long)]
    client_id: Option<String>,

    /// Client secret
    #[arg(long)]
    client_secret: Option<String>,

    /// Shared mailbox email address
    #[arg(long)]
    shared_mailbox: Option<String>,

    /// Minimum delay between emails in seconds
    #[arg(long, default_value_t = 30)]
    min_delay: u64,

    /// Maximum delay between emails in seconds
    #[arg(long, default_value_t = 120)]
    max_delay: u64,

    /// Maximum number of retries for a failed email
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Addresses to CC on every email
    #[arg(long, num_args = 1..)]
    cc: Vec<String>,

    /// Write the results summary to this JSON file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Show what would be sent without contacting any server
    #[arg(long)]
    dry_run: bool,

    /// Directory relative image paths resolve against (default: the template's directory)
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Identity platform authority (change for national clouds)
    #[arg(long, default_value = DEFAULT_AUTHORITY_URL)]
    authority_url: String,

    /// Graph API base URL (change for national clouds)
    #[arg(long, default_value = GRAPH_API_URL)]
    graph_url: String,

    /// OAuth2 scope requested for the Graph token
    #[arg(long, default_value = GRAPH_DEFAULT_SCOPE)]
    scope: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

/// Run the whole flow and return the process exit code.
///
/// Partial send failures still exit 0; only configuration and the up-front
/// authentication can fail the run.
async fn run(cli: Cli) -> Result<u8> {
    let config = resolve_config(&cli)?;
    let options = BatchOptions::new(&cli.subject)
        .delay(cli.min_delay, cli.max_delay)
        .max_retries(cli.max_retries)
        .cc(&cli.cc)?;
    options.validate()?;

    let recipients = input::load_recipients(&cli.recipients)?;
    let template = input::load_template(&cli.template)?;

    println!("Loaded {} recipients", recipients.len());
    println!("Using subject: {}", options.subject);
    println!("Using shared mailbox: {}", config.shared_mailbox);

    if cli.dry_run {
        print_dry_run(&options);
        return Ok(0);
    }

    let asset_dir = cli
        .asset_dir
        .clone()
        .unwrap_or_else(|| template_dir(&cli.template));

    let session = CredentialSession::new(config)
        .authority_url(&cli.authority_url)
        .scope(&cli.scope);
    let mailer = GraphMailer::from_session(session).base_url(&cli.graph_url);

    println!("Authenticating with Microsoft Graph...");
    if mailer.authenticate().await.is_err() {
        eprintln!("Authentication failed. Exiting.");
        return Ok(1);
    }

    let sender = BatchSender::new(mailer).preprocessor(MarkupPreprocessor::new(asset_dir));

    println!("Starting batch email sending...");
    let summary = sender.send_batch(&recipients, &template, &options).await;
    print_summary(&summary);

    if let Some(path) = &cli.output {
        match report::write_summary(path, &summary) {
            Ok(()) => println!("\nDetailed results saved to: {}", path.display()),
            Err(e) => eprintln!(
                "\nWarning: Failed to save results to {}: {}",
                path.display(),
                e
            ),
        }
    }

    Ok(0)
}

/// `--config` wins; then inline flags; then `GRAPH_*` environment variables.
fn resolve_config(cli: &Cli) -> Result<GraphConfig, MailError> {
    if let Some(path) = &cli.config {
        return GraphConfig::from_file(path);
    }

    let any_inline = cli.tenant_id.is_some()
        || cli.client_id.is_some()
        || cli.client_secret.is_some()
        || cli.shared_mailbox.is_some();

    if any_inline {
        GraphConfig::from_parts(
            cli.tenant_id.clone(),
            cli.client_id.clone(),
            cli.client_secret.clone(),
            cli.shared_mailbox.clone(),
        )
    } else {
        GraphConfig::from_env()
    }
}

fn template_dir(template: &Path) -> PathBuf {
    template
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_dry_run(options: &BatchOptions) {
    println!("*** DRY RUN MODE - No emails will be sent ***");
    println!("Would send emails with the following parameters:");
    println!("  Min delay: {} seconds", options.min_delay);
    println!("  Max delay: {} seconds", options.max_delay);
    println!("  Max retries: {}", options.max_retries);
    if !options.cc.is_empty() {
        let cc: Vec<&str> = options.cc.iter().map(|a| a.email.as_str()).collect();
        println!("  CC: {}", cc.join(", "));
    }
}

fn print_summary(summary: &BatchSummary) {
    let rule = "=".repeat(50);
    println!("\n{}", rule);
    println!("BATCH SENDING RESULTS");
    println!("{}", rule);
    println!("Total recipients: {}", summary.total);
    println!("Successfully sent: {}", summary.sent);
    println!("Failed: {}", summary.failed);
    println!("Skipped: {}", summary.skipped);
}
