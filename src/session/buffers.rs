//! Per-session temp buffers: an input file for uploads, an output file the
//! backend saves into, and a named pipe reserved for the (disabled)
//! streaming path.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::warn;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::errors::ShimError;

pub const INPUT_PREFIX: &str = "shim_input_buf_";
pub const OUTPUT_PREFIX: &str = "shim_output_buf_";
pub const PIPE_PREFIX: &str = "shim_output_pipe_";

/// The three per-session paths. All live in the configured temp directory
/// and are unlinked together on cleanup.
#[derive(Debug, Clone)]
pub struct SessionBuffers {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub pipe_path: PathBuf,
}

impl SessionBuffers {
    /// Create all three buffers. Input and output are plain files with
    /// unique suffixes; the pipe is made by renaming a fresh fifo (named
    /// after the session id) over a unique placeholder file, which yields a
    /// fifo at a unique path. Any failure removes whatever was created.
    pub fn create(tmp_dir: &Path, session_id: &str) -> Result<SessionBuffers, ShimError> {
        let mut created: Vec<PathBuf> = Vec::with_capacity(3);

        let result = (|| {
            let input_path = create_unique_file(tmp_dir, INPUT_PREFIX)?;
            created.push(input_path.clone());

            let output_path = create_unique_file(tmp_dir, OUTPUT_PREFIX)?;
            created.push(output_path.clone());

            let pipe_path = create_unique_file(tmp_dir, PIPE_PREFIX)?;
            created.push(pipe_path.clone());

            let fifo_staging = tmp_dir.join(format!("shim_fifo_{session_id}"));
            let _ = fs::remove_file(&fifo_staging);
            mkfifo(&fifo_staging, Mode::from_bits_truncate(0o666))
                .map_err(|err| ShimError::Server(format!("mkfifo failed: {err}")))?;
            fs::rename(&fifo_staging, &pipe_path)?;

            // The backend server may run as a different user than the
            // gateway, so every buffer must be open to it.
            for path in [&input_path, &output_path, &pipe_path] {
                fs::set_permissions(path, fs::Permissions::from_mode(0o666))?;
            }

            Ok(SessionBuffers {
                input_path,
                output_path,
                pipe_path,
            })
        })();

        if result.is_err() {
            for path in created {
                let _ = fs::remove_file(path);
            }
        }
        result
    }

    /// Unlink all three paths. Errors are logged, not propagated; cleanup
    /// runs on paths that may already be gone.
    pub fn remove(&self) {
        for path in [&self.input_path, &self.output_path, &self.pipe_path] {
            if let Err(err) = fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Can't remove session buffer {}: {err}", path.display());
                }
            }
        }
    }
}

fn create_unique_file(dir: &Path, prefix: &str) -> Result<PathBuf, ShimError> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .rand_bytes(6)
        .tempfile_in(dir)?;
    let (_, path) = file
        .keep()
        .map_err(|err| ShimError::Server(format!("can't persist buffer file: {err}")))?;
    Ok(path)
}
