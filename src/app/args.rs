use clap::{Parser, ValueEnum};
use tracing::Level;

/// SciDB HTTP shim: a session-oriented REST gateway for SciDB.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Optional TOML configuration file; command-line flags win over it.
    #[arg(short = 'c', long, env = "SHIM_CONFIG")]
    pub config_file: Option<String>,

    /// Comma-separated listening ports; append 's' for a TLS port
    /// (e.g. "8080,8083s").
    #[arg(short = 'p', long, env = "SHIM_PORTS")]
    pub ports: Option<String>,

    /// Document root for static file service.
    #[arg(short = 'r', long, env = "SHIM_DOCROOT")]
    pub document_root: Option<String>,

    /// SciDB coordinator host.
    #[arg(short = 'n', long, env = "SHIM_SCIDB_HOST")]
    pub scidb_host: Option<String>,

    /// SciDB coordinator port.
    #[arg(short = 's', long, env = "SHIM_SCIDB_PORT")]
    pub scidb_port: Option<u16>,

    /// Directory for per-session buffer files and pipes.
    #[arg(short = 't', long, env = "SHIM_TMPDIR")]
    pub tmp_dir: Option<String>,

    /// Maximum number of concurrent sessions (capped at 100).
    #[arg(short = 'm', long, env = "SHIM_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Session timeout in seconds (at least 60).
    #[arg(short = 'o', long, env = "SHIM_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Instance id that save() writes through (0 = coordinator).
    #[arg(short = 'i', long, env = "SHIM_SAVE_INSTANCE")]
    pub save_instance_id: Option<u64>,

    /// Rewrite eligible saves through aio_save().
    #[arg(short = 'a', long, default_value_t = false, env = "SHIM_USE_AIO")]
    pub aio: bool,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f', long, default_value_t = false)]
    pub foreground: bool,

    #[arg(short = 'l', long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(
        long,
        default_value_t = false,
        env,
        help = "disable colors in the log output"
    )]
    pub no_color: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogFormat {
    Text,
    Structured,
    Debug,
}
