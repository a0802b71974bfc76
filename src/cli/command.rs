use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}\nnut {}\ngit {}\nbuilt {}",
        env!("CARGO_PKG_VERSION"),
        nut::VERSION,
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown"),
        env!("BUILD_TIMESTAMP"),
    )
});

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION.as_str(),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for inspecting and demuxing NUT multimedia files",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level at which demuxer diagnostics become fatal.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write raw audio streams to WAV and raw video frames to PAM images.
    Decode(DecodeArgs),

    /// Print stream information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Input NUT file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Base path for output files.
    #[arg(long, value_name = "PATH")]
    pub output_path: PathBuf,

    /// Maximum number of images written per video stream.
    #[arg(long, value_name = "COUNT", default_value_t = 16)]
    pub max_images: u64,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input NUT file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Report format.
    #[arg(long, value_enum, default_value_t = InfoFormat::Plain)]
    pub format: InfoFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum InfoFormat {
    /// Aligned human-readable text.
    Plain,
    /// YAML document.
    Yaml,
}

#[test]
fn test_parse_decode_args() {
    let cli = Cli::parse_from([
        "nutd",
        "--strict",
        "decode",
        "in.nut",
        "--output-path",
        "out/base",
        "--max-images",
        "3",
    ]);

    assert_eq!(cli.fail_level(), log::Level::Warn);
    let Commands::Decode(args) = cli.command else {
        panic!("expected decode");
    };
    assert_eq!(args.input, PathBuf::from("in.nut"));
    assert_eq!(args.output_path, PathBuf::from("out/base"));
    assert_eq!(args.max_images, 3);
}

#[test]
fn test_parse_info_args() {
    let cli = Cli::parse_from(["nutd", "info", "-", "--format", "yaml", "--loglevel", "debug"]);

    assert_eq!(cli.fail_level(), log::Level::Error);
    assert_eq!(cli.loglevel.to_level_filter(), log::LevelFilter::Debug);
    let Commands::Info(args) = cli.command else {
        panic!("expected info");
    };
    assert_eq!(args.format, InfoFormat::Yaml);
}

#[test]
fn test_long_version() {
    let lines: Vec<&str> = LONG_VERSION.lines().collect();

    assert_eq!(lines[0], env!("CARGO_PKG_VERSION"));
    assert_eq!(lines[1], format!("nut {}", nut::VERSION));
    assert!(lines[3].starts_with("built "));
}
