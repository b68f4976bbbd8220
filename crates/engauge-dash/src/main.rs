//! Engauge dashboard CLI - browse analytics resources and edit server
//! settings from the terminal.
//!
//! Each invocation logs in, keeps its credential in memory only, and shares a
//! logout signal with every other running instance.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engauge_session::{
    ApiClient, ApiError, AuthProvider, Config, Interval, ListParams, ListResult, LoginCredentials,
    Resource, Settings,
};
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable checked before prompting for a password
const PASSWORD_ENV: &str = "ENGAUGE_PASSWORD";

#[derive(Parser)]
#[command(name = "engauge-dash", version, about = "Engauge analytics dashboard from the terminal")]
struct Cli {
    /// Engauge server address
    #[arg(long, env = "ENGAUGE_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Dashboard username (defaults to the last one used)
    #[arg(long, env = "ENGAUGE_USERNAME", global = true)]
    username: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List one page of a resource
    List {
        resource: Resource,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    /// Show a single record
    Show { resource: Resource, id: Option<String> },
    /// Print the server settings
    Settings,
    /// Flip one summary interval on or off
    ToggleStats { interval: Interval },
    /// Flip storage of raw interactions
    ToggleInteractions,
    /// Keep the session alive until it ends or Ctrl-C
    Watch,
    /// Log out here and in every other running instance
    Logout,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let session = config.session()?;
    let auth = AuthProvider::new(session.clone());
    let api = ApiClient::new(session);

    // Logging out needs no credential of its own
    if !matches!(cli.command, Command::Logout) {
        login(&auth, &mut config, cli.username).await?;
        auth.get_permissions()?;
    }

    let result = run(cli.command, &auth, &api).await;
    if result.is_err() && api.session().credential().is_none() {
        eprintln!("Session ended - run the command again to log in.");
    }
    result
}

async fn login(auth: &AuthProvider, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", username))?,
    };

    auth.login(&LoginCredentials::new(&username, password))
        .await
        .context("Login failed")?;

    if config.last_username.as_deref() != Some(username.as_str()) {
        config.last_username = Some(username);
        if let Err(e) = config.save() {
            warn!(error = ?e, "Failed to save config");
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No username given");
    }
    Ok(value)
}

/// Let the auth provider see every failed request; authentication failures
/// end the session.
fn api_failure(auth: &AuthProvider, error: ApiError) -> anyhow::Error {
    match auth.check_error(&error) {
        Err(rejection) => anyhow::Error::new(error).context(rejection.to_string()),
        Ok(()) => error.into(),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, auth: &AuthProvider, api: &ApiClient) -> Result<()> {
    match command {
        Command::List {
            resource,
            page,
            per_page,
        } => {
            let params = ListParams::page(page, per_page);
            let result: ListResult<Value> = api
                .get_list(resource.as_str(), &params)
                .await
                .map_err(|e| api_failure(auth, e))?;
            print_json(&result.data)?;
            println!(
                "{} {} of {} (page {})",
                result.data.len(),
                resource,
                result.total,
                params.pagination.page.max(1)
            );
        }
        Command::Show { resource, id } => {
            let id = match id {
                Some(id) => id,
                None if resource.is_singleton() => String::new(),
                None => bail!("{} needs a record id", resource),
            };
            let record: Value = api
                .get_one(resource.as_str(), &id)
                .await
                .map_err(|e| api_failure(auth, e))?;
            print_json(&record)?;
        }
        Command::Settings => {
            let settings = api.get_settings().await.map_err(|e| api_failure(auth, e))?;
            print_settings(&settings);
        }
        Command::ToggleStats { interval } => {
            let mut settings = api.get_settings().await.map_err(|e| api_failure(auth, e))?;
            settings.stats_toggles.toggle(interval);
            let saved = api
                .update_settings(&settings)
                .await
                .map_err(|e| api_failure(auth, e))?;
            info!(interval = %interval, enabled = saved.stats_toggles.is_enabled(interval), "Stats toggle updated");
            print_settings(&saved);
        }
        Command::ToggleInteractions => {
            let mut settings = api.get_settings().await.map_err(|e| api_failure(auth, e))?;
            settings.interactions_storage = !settings.interactions_storage;
            let saved = api
                .update_settings(&settings)
                .await
                .map_err(|e| api_failure(auth, e))?;
            print_settings(&saved);
        }
        Command::Watch => watch(api).await?,
        Command::Logout => {
            let redirect = auth.logout().await;
            println!("Logged out, next stop: {}", redirect);
        }
    }
    Ok(())
}

fn print_settings(settings: &Settings) {
    println!(
        "interactions storage: {}",
        on_off(settings.interactions_storage)
    );
    for interval in Interval::ALL {
        if interval == Interval::AllTime {
            continue;
        }
        println!(
            "{:>10} stats: {}",
            interval,
            on_off(settings.stats_toggles.is_enabled(interval))
        );
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

async fn watch(api: &ApiClient) -> Result<()> {
    let session = api.session();
    let mut changes = session.watch();
    if let Some(due) = session.renewal_due() {
        println!("Session active, next renewal in {}s (Ctrl-C to stop)", due.as_secs());
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!("Stopping");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() || !*changes.borrow_and_update() {
                    println!("Session ended");
                    break;
                }
            }
        }
    }
    Ok(())
}
