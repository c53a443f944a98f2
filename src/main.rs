//! amidoctor - manager interface doctor for PBX hosts
//!
//! Checks that the PBX manager interface is up and that the credential the
//! application uses actually authenticates, and repairs manager.conf and the
//! application's env mirror when it does not.

use amidoctor::backup::FsBackupStore;
use amidoctor::config::{endpoint, locate, ConfigEditor, FileConfigEditor};
use amidoctor::core::{
    AmiClient, DiagnosticController, DiagnosticOutcome, Inventory, ListenTableProbe, PortProbe,
    ProtocolClient, ProtocolOutcome, SystemdService,
};
use amidoctor::env_store::{EnvKeys, EnvStore};
use amidoctor::logger::{self, Verbosity};
use amidoctor::models::{Credential, SecureString, Username};
use amidoctor::settings::{CliOverrides, Settings};
use amidoctor::utils::{DiagnosticError, SettingsError};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// amidoctor - manager interface doctor
#[derive(Parser, Debug)]
#[command(name = "amidoctor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to manager.conf
    #[arg(long, global = true)]
    manager_conf: Option<PathBuf>,

    /// Environment mirror file (skips discovery)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Directory for snapshots taken before every write
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// JSON settings file (default: $AMIDOCTOR_SETTINGS)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Username to test, repair or configure
    #[arg(long, global = true)]
    username: Option<String>,

    /// Secret to test or write
    #[arg(long, global = true)]
    secret: Option<String>,

    /// Do not signal the service after rewriting manager.conf
    #[arg(long, global = true)]
    no_reload: bool,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Check everything and repair what fails
    Fix,

    /// Check everything, change nothing
    Check,

    /// Log in with the configured credential and report the result
    Test,

    /// Check, then report credential source, env mirror drift and backups
    Diag,

    /// Write an explicit or generated credential and reload
    Configure,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to open log file: {0}")]
    Logger(std::io::Error),

    #[error(transparent)]
    Diagnostic(#[from] DiagnosticError),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Diagnostic(
                DiagnosticError::AuthFailed
                | DiagnosticError::Unreachable(_)
                | DiagnosticError::Timeout(_),
            ) => 1,
            _ => 2,
        }
    }
}

#[derive(Serialize)]
struct TestReport<'a> {
    credential: String,
    login: &'a ProtocolOutcome,
}

#[derive(Serialize)]
struct DiagReport<'a> {
    outcome: &'a DiagnosticOutcome,
    inventory: &'a Inventory,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("amidoctor: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<u8, CliError> {
    let mut settings = Settings::load(cli.settings.as_deref())?;
    settings.apply(&CliOverrides {
        manager_conf: cli.manager_conf.clone(),
        env_file: cli.env_file.clone(),
        backup_dir: cli.backup_dir.clone(),
        no_reload: cli.no_reload,
    });

    logger::init(
        Verbosity::from_flags(cli.verbose, cli.quiet),
        settings.log_file.as_deref(),
    )
    .map_err(CliError::Logger)?;
    tracing::debug!(command = ?cli.command, manager_conf = %settings.manager_conf.display(), "resolved settings");

    let secret = cli.secret.as_deref().map(SecureString::new);
    let probe: Arc<dyn PortProbe> = Arc::new(ListenTableProbe::new(settings.probe_timeout()));

    match cli.command {
        Commands::Test => test_login(&settings, &cli, probe, secret).await,
        Commands::Fix | Commands::Check | Commands::Configure => {
            let auto_fix = cli.command != Commands::Check;
            let controller = build_controller(&settings, probe, auto_fix, cli.username.clone(), secret);
            let outcome = if cli.command == Commands::Configure {
                controller.configure().await
            } else {
                controller.run().await
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", outcome);
            }
            Ok(exit_code(&outcome))
        }
        Commands::Diag => {
            let controller = build_controller(&settings, probe, false, cli.username.clone(), secret);
            let outcome = controller.run().await;
            let inventory = controller.inventory();
            if cli.json {
                let report = DiagReport {
                    outcome: &outcome,
                    inventory: &inventory,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", outcome);
                print_inventory(&inventory);
            }
            Ok(exit_code(&outcome))
        }
    }
}

fn exit_code(outcome: &DiagnosticOutcome) -> u8 {
    u8::try_from(outcome.exit_code()).unwrap_or(1)
}

fn build_controller(
    settings: &Settings,
    probe: Arc<dyn PortProbe>,
    auto_fix: bool,
    username: Option<String>,
    secret: Option<SecureString>,
) -> DiagnosticController {
    let protocol = AmiClient::new(probe.clone()).with_connect_timeout(settings.connect_timeout());
    let controller = DiagnosticController::new(
        Box::new(FileConfigEditor::new(&settings.manager_conf)),
        Box::new(FsBackupStore::new(&settings.backup_dir, settings.backup_retention)),
        Box::new(protocol),
        Box::new(SystemdService::new(
            &settings.service_unit,
            &settings.pbx_cli,
            settings.service_timeout(),
        )),
        probe,
        settings.diagnostic_options(auto_fix, username, secret),
    );

    match EnvStore::discover(&settings.env_candidates) {
        Ok(store) => controller.with_env_mirror(store, EnvKeys::new(&settings.env_prefix)),
        Err(e) => {
            tracing::info!(error = %e, "no environment mirror; skipping sync");
            controller
        }
    }
}

/// Locate the credential (flags override it) and try one login
async fn test_login(
    settings: &Settings,
    cli: &Cli,
    probe: Arc<dyn PortProbe>,
    secret: Option<SecureString>,
) -> Result<u8, CliError> {
    let reserved = settings.reserved_section.as_str();
    let doc = FileConfigEditor::new(&settings.manager_conf)
        .load()
        .map_err(DiagnosticError::from)?;
    let (host, port) = endpoint(&doc, reserved);
    let located = locate(&doc, reserved).ok();

    let username = match (&cli.username, &located) {
        (Some(name), _) => Username::new(name.as_str()).map_err(DiagnosticError::from)?,
        (None, Some(credential)) => credential.username().clone(),
        (None, None) => return Err(DiagnosticError::SecretNotFound.into()),
    };
    let secret = match (secret, &located) {
        (Some(secret), _) => secret,
        (None, Some(credential)) => credential.secret().clone(),
        (None, None) => return Err(DiagnosticError::SecretNotFound.into()),
    };
    let credential = Credential::new(username, secret, host, port);

    let client = AmiClient::new(probe).with_connect_timeout(settings.connect_timeout());
    let login = client
        .login(&credential, std::time::Duration::from_millis(settings.read_timeout_ms))
        .await;

    if cli.json {
        let report = TestReport {
            credential: credential.to_string(),
            login: &login,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Credential: {}", credential);
        if let Some(banner) = &login.banner {
            println!("Banner:     {}", banner);
        }
        println!("Result:     {}", login.result);
        if !login.raw.is_empty() {
            for line in login.raw.lines() {
                println!("  {}", line);
            }
        }
    }
    Ok(if login.is_authenticated() { 0 } else { 1 })
}

fn print_inventory(inventory: &Inventory) {
    println!();
    println!("Manager config:  {}", inventory.manager_conf.display());
    println!("Sections:        {}", inventory.sections.join(", "));
    println!(
        "Credential:      {}",
        inventory.credential.as_deref().unwrap_or("(none)")
    );
    match &inventory.env_mirror {
        Some(path) if inventory.env_drift.is_empty() => {
            println!("Env mirror:      {} (consistent)", path.display())
        }
        Some(path) => println!(
            "Env mirror:      {} (differs: {})",
            path.display(),
            inventory.env_drift.join(", ")
        ),
        None => println!("Env mirror:      (none found)"),
    }
    println!("Backups:         {}", inventory.backups.len());
    for handle in &inventory.backups {
        println!(
            "  {}  {}  {}",
            handle.timestamp().format("%Y-%m-%d %H:%M:%S"),
            handle.checksum().get(..12).unwrap_or(handle.checksum()),
            handle.snapshot_path().display()
        );
    }
    for problem in &inventory.problems {
        println!("Problem:         {}", problem);
    }
}
