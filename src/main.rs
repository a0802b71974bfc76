use std::io::Write;

use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::decode::cmd_decode;
use cli::info::cmd_info;

mod byteorder;
mod cli;
mod input;
mod pam;
mod timestamp;
mod wav;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();

    let progress = init_logger(&cli, &multi)?;

    match &cli.command {
        Commands::Decode(args) => cmd_decode(args, &cli, progress),
        Commands::Info(args) => cmd_info(args, &cli, progress),
    }
}

/// Installs the global logger.
///
/// With `--progress` records are routed through `multi` so they do not tear
/// the progress bars, and `multi` is handed back for the commands to draw on.
fn init_logger<'a>(cli: &Cli, multi: &'a MultiProgress) -> Result<Option<&'a MultiProgress>> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());

    match cli.log_format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = serde_json::json!({
                    "ts": buf.timestamp().to_string(),
                    "lvl": record.level().as_str(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{line}")
            });
        }
    }

    if cli.progress {
        LogWrapper::new(multi.clone(), builder.build()).try_init()?;
        Ok(Some(multi))
    } else {
        builder.try_init()?;
        Ok(None)
    }
}
