//! Medication therapy review session driver
//!
//! Runs one review session per invocation, either a single command or an
//! interactive session reading commands from stdin.

mod commands;
mod step_input;

use anyhow::{Context, Result};
use clap::{Arg, ArgGroup, ArgMatches, Command};
use commands::{CliSession, SessionCommand};
use review_core::{
    FileReviewStore, GatewayKind, PatientId, PermissionGate, RestReviewGateway, ReviewConfig,
    ReviewGateway, ReviewId, ReviewSession, RolePermissionGate, SessionOptions, SessionPhase,
    SessionStart, StepRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

fn cli() -> Command {
    Command::new("mtr-session")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Medication therapy review session driver")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .env("MTR_CONFIG")
                .help("Configuration file path (defaults apply when omitted)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Root directory of the file review store"),
        )
        .arg(
            Arg::new("patient")
                .long("patient")
                .short('p')
                .value_name("ID")
                .help("Resume the patient's in-progress review or start one"),
        )
        .arg(
            Arg::new("review")
                .long("review")
                .short('r')
                .value_name("ID")
                .help("Open a specific review"),
        )
        .group(
            ArgGroup::new("target")
                .args(["patient", "review"])
                .required(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("status").about("Show the review and its steps"))
        .subcommand(
            Command::new("next")
                .about("Complete the current step and advance")
                .arg(
                    Arg::new("data")
                        .long("data")
                        .short('d')
                        .value_name("JSON")
                        .help("Step data as JSON"),
                ),
        )
        .subcommand(Command::new("back").about("Go back one step"))
        .subcommand(
            Command::new("jump")
                .about("Jump to a completed step or the next open one")
                .arg(
                    Arg::new("index")
                        .required(true)
                        .value_parser(clap::value_parser!(usize))
                        .help("Step index as shown by status"),
                ),
        )
        .subcommand(Command::new("save").about("Save the review"))
        .subcommand(Command::new("complete").about("Save and complete the review"))
        .subcommand(Command::new("cancel").about("Cancel the review"))
        .subcommand(Command::new("session").about("Interactive session reading commands from stdin"))
}

fn load_config(matches: &ArgMatches) -> Result<ReviewConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let config = ReviewConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))?;
            log::info!("Loaded configuration from {}", path);
            config
        }
        None => ReviewConfig::default(),
    };

    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.gateway.data_dir = PathBuf::from(dir);
    }
    config.validate()?;
    Ok(config)
}

async fn build_backend(config: &ReviewConfig) -> Result<(Arc<dyn ReviewGateway>, Arc<dyn PermissionGate>)> {
    match config.gateway.kind {
        GatewayKind::File => {
            let store = FileReviewStore::new(&config.gateway.data_dir)
                .await
                .with_context(|| format!("Failed to open review store at {}", config.gateway.data_dir.display()))?;
            log::info!("Using review store at {}", store.root_path().display());

            let gateway: Arc<dyn ReviewGateway> = Arc::new(store);
            let gate: Arc<dyn PermissionGate> = Arc::new(RolePermissionGate::new(&config.permissions));
            Ok((gateway, gate))
        }
        GatewayKind::Rest => {
            let client = Arc::new(RestReviewGateway::new(&config.gateway)?);
            log::info!("Using review service at {}", config.gateway.base_url.as_deref().unwrap_or_default());

            let gateway: Arc<dyn ReviewGateway> = client.clone();
            let gate: Arc<dyn PermissionGate> = client;
            Ok((gateway, gate))
        }
    }
}

fn session_start(matches: &ArgMatches) -> Result<SessionStart> {
    if let Some(id) = matches.get_one::<String>("review") {
        let review_id = ReviewId::from_string(id).context("Invalid review id")?;
        return Ok(SessionStart::Review(review_id));
    }
    let id = matches
        .get_one::<String>("patient")
        .context("Either --patient or --review is required")?;
    let patient_id = PatientId::from_string(id).context("Invalid patient id")?;
    Ok(SessionStart::Patient(patient_id))
}

fn one_shot_command(name: &str, args: &ArgMatches) -> Option<SessionCommand> {
    Some(match name {
        "status" => SessionCommand::Status,
        "next" => SessionCommand::Next(args.get_one::<String>("data").cloned()),
        "back" => SessionCommand::Back,
        "jump" => SessionCommand::Jump(*args.get_one::<usize>("index")?),
        "save" => SessionCommand::Save,
        "complete" => SessionCommand::Complete,
        "cancel" => SessionCommand::Cancel,
        _ => return None,
    })
}

/// Run one command, persist any cursor change, then leave
///
/// Status is printed and the session torn down even when the command or the
/// save fails; the first error is returned.
async fn run_once(mut session: CliSession, command: SessionCommand) -> Result<()> {
    let mut result = commands::execute(&mut session, &command).await;

    if result.is_ok() && session.phase() == SessionPhase::Active && session.snapshot().dirty {
        result = session.save().await.context("Failed to save the review");
    }
    commands::print_status(&session);
    session.teardown().await;
    result
}

/// Read commands from stdin until quit, EOF, Ctrl-C or a terminal state
async fn run_interactive(mut session: CliSession) -> Result<()> {
    commands::print_status(&session);
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing session");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let command = match SessionCommand::parse(&line) {
            Ok(SessionCommand::Quit) => break,
            Ok(command) => command,
            Err(message) => {
                eprintln!("! {}", message);
                continue;
            }
        };

        match commands::execute(&mut session, &command).await {
            Ok(()) => commands::print_status(&session),
            Err(e) => commands::report_error(&e),
        }

        if session.phase().is_terminal() {
            break;
        }
    }

    session.teardown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let start = session_start(&matches)?;
    let (gateway, gate) = build_backend(&config).await?;

    let (name, sub_matches) = matches
        .subcommand()
        .context("A subcommand is required")?;
    let interactive = name == "session";

    let mut options = SessionOptions::from(&config);
    if !interactive {
        // One-shot commands save explicitly before exiting
        options.autosave_enabled = false;
    }

    let mut session: CliSession =
        ReviewSession::new(gateway, gate, Arc::new(StepRegistry::default()), options);
    session.initialize(start).await?;

    if interactive {
        return run_interactive(session).await;
    }

    let command = one_shot_command(name, sub_matches)
        .with_context(|| format!("Unknown command '{}'", name))?;
    run_once(session, command).await
}
