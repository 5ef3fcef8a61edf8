//! /get_log support: locate the backend server's log file by inspecting
//! running processes and return its tail. Best-effort, not a hot path.

use std::io::SeekFrom;
use std::path::PathBuf;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::get_config;

/// How much of the log to return at most.
const TAIL_BYTES: u64 = 256 * 1024;

/// Return the tail of the backend log, or a short explanation when no
/// backend process (or log) can be found.
pub async fn tail() -> String {
    let config = get_config();
    let log_path = match find_log(
        &config.general.scidb_proc_name,
        &config.general.scidb_log_name,
    ) {
        Some(path) => path,
        None => {
            return format!(
                "no running {} process with a {} was found",
                config.general.scidb_proc_name, config.general.scidb_log_name
            );
        }
    };

    debug!("Tailing backend log {}", log_path.display());
    match read_tail(&log_path).await {
        Ok(contents) => contents,
        Err(err) => format!("can't read {}: {err}", log_path.display()),
    }
}

/// Scan /proc for the first process whose name matches, resolve its working
/// directory and look for the log file there.
fn find_log(proc_name: &str, log_name: &str) -> Option<PathBuf> {
    let needle = proc_name.to_lowercase();
    let entries = std::fs::read_dir("/proc").ok()?;
    for entry in entries.flatten() {
        if !entry
            .file_name()
            .to_string_lossy()
            .bytes()
            .all(|b| b.is_ascii_digit())
        {
            continue;
        }
        let pid_dir = entry.path();
        let comm = match std::fs::read_to_string(pid_dir.join("comm")) {
            Ok(comm) => comm,
            Err(_) => continue,
        };
        if !comm.trim().to_lowercase().contains(&needle) {
            continue;
        }
        let cwd = match std::fs::read_link(pid_dir.join("cwd")) {
            Ok(cwd) => cwd,
            Err(_) => continue,
        };
        let candidate = cwd.join(log_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

async fn read_tail(path: &PathBuf) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > TAIL_BYTES {
        file.seek(SeekFrom::Start(len - TAIL_BYTES)).await?;
    }
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8_lossy(&contents).into_owned())
}
