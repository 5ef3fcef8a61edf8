//! Daemonization: detach from the controlling terminal and record the pid.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::process;

use nix::unistd::{fork, setsid, ForkResult};

/// Classic double-fork. The caller must invoke this before the tokio
/// runtime exists; forking a multi-threaded process is undefined enough.
pub fn daemonize(pid_file: &str) -> Result<(), Box<dyn std::error::Error>> {
    // First fork: the parent returns to the shell immediately.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => process::exit(exitcode::OK),
        ForkResult::Child => {}
    }

    setsid()?;

    // Second fork: drop session leadership so the daemon can never
    // reacquire a controlling terminal.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => process::exit(exitcode::OK),
        ForkResult::Child => {}
    }

    let devnull = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for target in 0..=2 {
        if unsafe { libc::dup2(devnull.as_raw_fd(), target) } < 0 {
            return Err(Box::new(std::io::Error::last_os_error()));
        }
    }

    fs::write(pid_file, format!("{}\n", process::id()))?;
    Ok(())
}
