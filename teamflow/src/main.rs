//! `teamflow` command-line interface.
//!
//! `run` streams one request's lifecycle events as NDJSON on stdout,
//! `check-code` runs the code-safety validator on a file or stdin, and
//! `init-config` writes the default configuration.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use teamflow::core::events::RunEvent;
use teamflow::core::query::{QueryScreen, screen_query};
use teamflow::core::validator::CodeSafetyValidator;
use teamflow::engine::{RunRequest, WorkflowEngine};
use teamflow::exit_codes;
use teamflow::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config, write_config};
use teamflow::io::oracle::CommandOracle;
use teamflow::io::sandbox::ProcessSandbox;
use teamflow::logging;

#[derive(Parser)]
#[command(
    name = "teamflow",
    version,
    about = "Supervisor/worker workflow engine with a code-safety gate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one request and stream NDJSON events to stdout.
    Run {
        /// The user request.
        #[arg(short, long)]
        query: String,
        /// Supervisor decisions allowed before a forced finish.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Most recent messages visible to the supervisor and workers.
        #[arg(long)]
        message_window: Option<usize>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Check analysis code with the safety validator (reads stdin without FILE).
    CheckCode {
        file: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match dispatch(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            query,
            max_iterations,
            message_window,
            config,
        } => {
            let mut request = RunRequest::new(query);
            request.max_iterations = max_iterations;
            request.message_window = message_window;
            cmd_run(request, &config).await
        }
        Command::CheckCode { file, config } => cmd_check_code(file.as_deref(), &config),
        Command::InitConfig { force, path } => cmd_init_config(force, &path),
    }
}

async fn cmd_run(request: RunRequest, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    match screen_query(&request.query) {
        QueryScreen::Accept => {}
        QueryScreen::Ambiguous(suggestion) => warn!(%suggestion, "query is vague"),
        QueryScreen::Reject(reason) => bail!("query rejected: {reason}"),
    }

    let oracle = Arc::new(CommandOracle::new(&config.oracle));
    let sandbox = Arc::new(ProcessSandbox::new(&config.sandbox));
    let engine = WorkflowEngine::new(config, oracle, sandbox).context("build engine")?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let mut events = pin!(engine.run(request, cancel)?);
    let mut stdout = std::io::stdout();
    let mut code = exit_codes::FAILED;
    while let Some(event) = events.next().await {
        let line = event.to_ndjson().context("encode event")?;
        writeln!(stdout, "{line}").context("write event")?;
        stdout.flush().context("flush stdout")?;
        code = match event {
            RunEvent::Finish { .. } => exit_codes::OK,
            RunEvent::Error { .. } => exit_codes::FAILED,
            _ => code,
        };
    }
    interrupt.abort();
    Ok(code)
}

fn cmd_check_code(file: Option<&Path>, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let code = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    let result = CodeSafetyValidator::new(&config.validator).validate(&code);
    println!(
        "{}",
        serde_json::to_string(&result).context("encode validation result")?
    );
    Ok(if result.allowed {
        exit_codes::OK
    } else {
        exit_codes::DENIED
    })
}

fn cmd_init_config(force: bool, path: &Path) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
