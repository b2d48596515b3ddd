use std::io::{self, Write};

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::app::{App, DemoConfig};
use crate::error::{DemoError, Result};

/// Which properties the view reads on every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderMode {
    /// Read only `count`.
    Count,
    /// Read only `name`.
    Name,
    /// Read both properties.
    Both,
}

#[derive(Debug, Parser)]
#[command(
    name = "perception-demo",
    about = "Counter demo: re-render only when the properties a view read change",
    version
)]
pub struct Cli {
    /// Number of model mutations to apply.
    #[arg(long, default_value_t = 8)]
    pub steps: u32,

    /// Properties read by the view.
    #[arg(long, value_enum, default_value_t = RenderMode::Both)]
    pub mode: RenderMode,

    /// Skip notification when a write stores an equal value.
    #[arg(long)]
    pub equality_gated: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn config(&self) -> Result<DemoConfig> {
        if self.steps == 0 {
            return Err(DemoError::InvalidArgument {
                message: "--steps must be at least 1".into(),
            });
        }
        Ok(DemoConfig {
            steps: self.steps,
            mode: self.mode,
            equality_gated: self.equality_gated,
        })
    }
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    init_logging(&cli)?;
    info!(
        steps = config.steps,
        mode = ?config.mode,
        equality_gated = config.equality_gated,
        "perception-demo v{}",
        env!("CARGO_PKG_VERSION")
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = App::new(config).run(&mut out)?;
    writeln!(
        out,
        "renders={} notifications={} skipped_writes={}",
        summary.renders, summary.notifications, summary.skipped_writes
    )?;
    Ok(())
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .try_init()
    };
    installed.map_err(|error| DemoError::Logging {
        message: error.to_string(),
    })
}
