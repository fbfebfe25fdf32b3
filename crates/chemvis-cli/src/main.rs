//! chemvis - a terminal dashboard for equipment CSV datasets.
//!
//! Log in, upload CSV files, and view summaries, rows and PDF reports
//! served by the chemvis API.

mod format;
mod render;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chemvis_core::auth::InvalidationReason;
use chemvis_core::config::{api_root, API_URL_ENV};
use chemvis_core::{ApiClient, ApiError, Config, SessionEvent};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable that supplies the password non-interactively
const PASSWORD_ENV: &str = "CHEMVIS_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "chemvis", version, about = "Upload equipment CSV datasets and view their summaries")]
struct Cli {
    /// Origin of the chemvis API, e.g. https://chemvis.example.org
    #[arg(long, env = API_URL_ENV, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the issued tokens
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Forget stored tokens
    Logout,
    /// Show whether a session is active
    Status,
    /// List recently uploaded datasets
    Datasets,
    /// Show a dataset's summary and rows
    Show {
        id: i64,
        /// Only print the summary
        #[arg(long)]
        summary_only: bool,
    },
    /// Upload a CSV file
    Upload { file: PathBuf },
    /// Download a dataset's PDF report
    Report {
        id: i64,
        /// Where to save the report (defaults to `<dataset name>_report.pdf`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load()?;
    let origin = config.api_origin(cli.api_url.as_deref());
    info!(origin = %origin, "chemvis starting");

    let store = config.credential_store()?;
    let client = ApiClient::new(&api_root(&origin), store)?;
    let mut events = client.subscribe();

    let result = run(cli.command, &client, &mut config).await;

    report_session_events(&mut events);
    result
}

async fn run(command: Command, client: &ApiClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username } => login(client, config, username).await,
        Command::Logout => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            println!(
                "{}",
                render::session_status(client.session().as_ref(), client.is_authenticated())
            );
            Ok(())
        }
        Command::Datasets => {
            require_session(client)?;
            let datasets = client.list_datasets().await.map_err(user_error)?;
            print!("{}", render::dataset_list(&datasets));
            Ok(())
        }
        Command::Show { id, summary_only } => {
            require_session(client)?;
            let dataset = client.fetch_dataset(id).await.map_err(user_error)?;
            print!("{}", render::summary(&dataset));
            if !summary_only {
                let rows = client.fetch_dataset_data(id).await.map_err(user_error)?;
                println!();
                print!("{}", render::records(&rows));
            }
            Ok(())
        }
        Command::Upload { file } => {
            require_session(client)?;
            upload(client, &file).await
        }
        Command::Report { id, output } => {
            require_session(client)?;
            report(client, id, output).await
        }
    }
}

/// Gate resource commands the way the dashboard gated its views.
///
/// An expired access token still passes when a refresh token is stored,
/// since the first request will renew it.
fn require_session(client: &ApiClient) -> Result<()> {
    if client.can_resume() {
        Ok(())
    } else {
        bail!("Not logged in. Run `chemvis login` first.")
    }
}

async fn login(client: &ApiClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        bail!("Username is required");
    }

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?,
    };

    let session = client.login(&username, &password).await.map_err(user_error)?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to save config");
    }

    println!("{}", render::session_status(Some(&session), true));
    Ok(())
}

async fn upload(client: &ApiClient, file: &Path) -> Result<()> {
    let contents = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", file.display()))?;

    let dataset = client
        .upload_dataset(file_name, contents)
        .await
        .map_err(user_error)?;
    println!("Uploaded as dataset #{}.\n", dataset.id);
    print!("{}", render::summary(&dataset));
    Ok(())
}

async fn report(client: &ApiClient, id: i64, output: Option<PathBuf>) -> Result<()> {
    let path = match output {
        Some(path) => path,
        None => {
            let dataset = client.fetch_dataset(id).await.map_err(user_error)?;
            PathBuf::from(dataset.report_file_name())
        }
    };

    let pdf = client.download_report(id).await.map_err(user_error)?;
    std::fs::write(&path, &pdf)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    println!("Saved report to {} ({} bytes).", path.display(), pdf.len());
    Ok(())
}

/// Turn API errors into messages fit for the terminal
fn user_error(e: ApiError) -> anyhow::Error {
    match e {
        ApiError::InvalidCredentials => anyhow::anyhow!("Login failed: invalid username or password"),
        e if e.requires_login() => anyhow::anyhow!("{}. Run `chemvis login` to sign in again.", e),
        e => e.into(),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Print notices for session changes the user did not ask for
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Invalidated(reason) => {
                let why = match reason {
                    InvalidationReason::NoRefreshCredential => "no refresh token was stored",
                    InvalidationReason::RefreshRejected => "the refresh token was rejected",
                    InvalidationReason::RefreshUnreachable => "the server could not be reached",
                    InvalidationReason::ReplayRejected => "the renewed token was rejected",
                };
                eprintln!("Session expired ({}); stored credentials were cleared.", why);
            }
            SessionEvent::Refreshed => debug!("Session renewed"),
            SessionEvent::LoggedIn | SessionEvent::LoggedOut => {}
        }
    }
}
