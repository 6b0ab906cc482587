//! Replays an engine command script over the recording backend and prints
//! the GPU command stream it produced.
//!
//! ## Usage
//!
//! ```bash
//! # Dump the command stream of a script
//! frame-dump scene.json
//!
//! # Override the back buffer size and write the report to a file
//! frame-dump scene.json --width 1920 --height 1080 --output scene.dump.json
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use nativekit_common::{init_logging, ErrorCategory, LogConfig, LogFormat, NativeKitError, ResultExt};
use tracing::{error, info};

mod script;

use script::{Replayer, Script};

#[derive(Parser)]
#[command(name = "frame-dump")]
#[command(about = "Replay an engine command script and dump the recorded GPU commands")]
struct Cli {
    /// Script to replay
    script: PathBuf,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the back buffer width
    #[arg(long)]
    width: Option<u32>,

    /// Override the back buffer height
    #[arg(long)]
    height: Option<u32>,

    /// Log format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format));

    let mut script = Script::load(&cli.script)?;
    if let Some(width) = cli.width {
        script.config.width = width;
    }
    if let Some(height) = cli.height {
        script.config.height = height;
    }

    let base_dir = cli.script.parent().unwrap_or(Path::new(".")).to_path_buf();
    let report = match Replayer::new(&script, base_dir)?.run(&script.steps) {
        Ok(report) => report,
        Err(err) => {
            let err = NativeKitError::from(err);
            error!(
                script = %cli.script.display(),
                category = %err.category(),
                error = %err,
                "Replay failed"
            );
            return Err(err.into());
        }
    };

    let json = serde_json::to_string_pretty(&report).context(ErrorCategory::Internal, "serializing report")?;
    match cli.output {
        Some(path) => {
            std::fs::write(&path, json).context(ErrorCategory::Io, format!("writing {}", path.display()))?;
            info!(path = %path.display(), commands = report.commands.len(), "Report written");
        }
        None => println!("{json}"),
    }

    if report.fatal_count > 0 {
        error!(fatal_count = report.fatal_count, "Backend reported fatal errors");
        std::process::exit(1);
    }
    Ok(())
}
