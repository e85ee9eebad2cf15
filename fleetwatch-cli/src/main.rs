use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fleetwatch_channel::{transport, TelemetryChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;
mod settings;

use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(about = "Watch the liveness and logs of remote agents over a telemetry channel")]
struct Args {
    /// Telemetry endpoint: ws://host:port/path or tcp://host:port
    #[arg(short, long)]
    url: Option<String>,

    /// Settings file (TOML). Values can also come from FLEETWATCH_* variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a snapshot to this JSON file after --wait seconds and exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Seconds to collect before exporting (used with --export)
    #[arg(short, long, default_value = "5", requires = "export")]
    wait: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Interactive commands read from stdin, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Toggle,
    Clear,
    Agents,
    Logs,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "t" | "toggle" => Some(Command::Toggle),
            "c" | "clear" => Some(Command::Clear),
            "a" | "s" | "agents" => Some(Command::Agents),
            "l" | "logs" => Some(Command::Logs),
            "h" | "help" | "?" => Some(Command::Help),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "commands: t(oggle) connection, c(lear) logs, s/a (agents), l(ogs), q(uit)";

/// Number of log lines printed by the `logs` command.
const RECENT_LOGS: usize = 20;

fn init_tracing(default_filter: &str) {
    // Logs go to stderr so stdout stays clean for snapshot output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let settings = Settings::load(args.config.as_deref())?;
    let url = args
        .url
        .or(settings.url)
        .context("No endpoint given: pass --url or set `url` in the settings file")?;

    let transport = transport::from_url(&url)?;
    let channel = TelemetryChannel::builder()
        .config(settings.channel)
        .transport(transport)
        .build()?;
    channel.enable();

    // Handle export mode (non-interactive)
    if let Some(export_path) = args.export {
        return export_after(&channel, &export_path, Duration::from_secs(args.wait)).await;
    }

    run_interactive(&channel).await
}

async fn run_interactive(channel: &TelemetryChannel) -> Result<()> {
    let _subscription = channel.subscribe(|snapshot| println!("{}", render::summary_line(&snapshot)));
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // Keep watching until ctrl-c
                    stdin_open = false;
                    continue;
                };
                match Command::parse(&line) {
                    Some(Command::Toggle) => channel.toggle(),
                    Some(Command::Clear) => channel.clear_logs(),
                    Some(Command::Agents) => println!("{}", render::agent_table(&channel.current())),
                    Some(Command::Logs) => println!("{}", render::recent_logs(&channel.current(), RECENT_LOGS)),
                    Some(Command::Quit) => break,
                    Some(Command::Help) | None => println!("{}", HELP),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.disable();
    Ok(())
}

/// Collect for `wait`, then write the current snapshot as pretty JSON.
async fn export_after(channel: &TelemetryChannel, path: &Path, wait: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted, exporting early"),
    }

    let snapshot = channel.current();
    channel.disable();

    let json = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Exported snapshot to: {}", path.display());
    Ok(())
}
