//! General configuration settings for the gateway.

use serde_derive::{Deserialize, Serialize};

/// General configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct General {
    /// Comma-separated listening ports; a trailing `s` marks a TLS port
    /// (e.g. "8080,8083s").
    #[serde(default = "General::default_ports")]
    pub ports: String,

    #[serde(default = "General::default_bind_host")]
    pub bind_host: String,

    /// Root of the static file tree served for unknown URIs.
    #[serde(default = "General::default_document_root")]
    pub document_root: String,

    /// SciDB coordinator address.
    #[serde(default = "General::default_scidb_host")]
    pub scidb_host: String,

    #[serde(default = "General::default_scidb_port")]
    pub scidb_port: u16,

    /// Directory holding per-session buffer files and pipes.
    #[serde(default = "General::default_tmp_dir")]
    pub tmp_dir: String,

    /// Size of the session pool, capped at [`super::MAX_SESSIONS_LIMIT`].
    #[serde(default = "General::default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds an untouched session survives before the reaper may take it.
    #[serde(default = "General::default_session_timeout")]
    pub session_timeout: u64,

    /// Instance id passed as the save target (0 = coordinator).
    #[serde(default)]
    pub save_instance_id: u64,

    /// Rewrite saves through aio_save() where the format allows it.
    #[serde(default)]
    pub use_aio: bool,

    /// Credentials used when /new_session omits user/password.
    #[serde(default)]
    pub default_user: String,

    #[serde(default)]
    pub default_password: String,

    #[serde(default = "General::default_daemon_pid_file")]
    pub daemon_pid_file: String,

    #[serde(default = "General::default_worker_threads")]
    pub worker_threads: usize,

    /// Backend connect timeout, milliseconds.
    #[serde(default = "General::default_connect_timeout")]
    pub connect_timeout: u64,

    /// When set, log to syslog under this program name instead of stderr.
    #[serde(default)]
    pub syslog_prog_name: Option<String>,

    /// Process name /get_log scans /proc for.
    #[serde(default = "General::default_scidb_proc_name")]
    pub scidb_proc_name: String,

    /// Log file name looked up under the backend process working directory.
    #[serde(default = "General::default_scidb_log_name")]
    pub scidb_log_name: String,
}

impl General {
    pub fn default_ports() -> String {
        "8080".to_string()
    }

    pub fn default_bind_host() -> String {
        "0.0.0.0".to_string()
    }

    pub fn default_document_root() -> String {
        "/var/lib/shim/wwwroot".to_string()
    }

    pub fn default_scidb_host() -> String {
        "localhost".to_string()
    }

    pub fn default_scidb_port() -> u16 {
        1239
    }

    pub fn default_tmp_dir() -> String {
        "/tmp".to_string()
    }

    pub fn default_max_sessions() -> usize {
        50
    }

    pub fn default_session_timeout() -> u64 {
        60
    }

    pub fn default_daemon_pid_file() -> String {
        "/var/run/shim.pid".to_string()
    }

    pub fn default_worker_threads() -> usize {
        num_cpus::get()
    }

    pub fn default_connect_timeout() -> u64 {
        15_000
    }

    pub fn default_scidb_proc_name() -> String {
        "SciDB".to_string()
    }

    pub fn default_scidb_log_name() -> String {
        "scidb.log".to_string()
    }
}

impl Default for General {
    fn default() -> General {
        General {
            ports: Self::default_ports(),
            bind_host: Self::default_bind_host(),
            document_root: Self::default_document_root(),
            scidb_host: Self::default_scidb_host(),
            scidb_port: Self::default_scidb_port(),
            tmp_dir: Self::default_tmp_dir(),
            max_sessions: Self::default_max_sessions(),
            session_timeout: Self::default_session_timeout(),
            save_instance_id: 0,
            use_aio: false,
            default_user: String::new(),
            default_password: String::new(),
            daemon_pid_file: Self::default_daemon_pid_file(),
            worker_threads: Self::default_worker_threads(),
            connect_timeout: Self::default_connect_timeout(),
            syslog_prog_name: None,
            scidb_proc_name: Self::default_scidb_proc_name(),
            scidb_log_name: Self::default_scidb_log_name(),
        }
    }
}
