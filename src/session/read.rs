//! Read pipeline: serve a session's output buffer back to HTTP callers,
//! either as raw bytes or as whole lines.

use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use super::{SaveMode, SessionSlot, SlotInner};
use crate::errors::ShimError;

/// Tick used while waiting for pipe data in streaming mode.
const POLL_TICK: Duration = Duration::from_millis(250);

/// Read up to `n` bytes from the output buffer. `n < 1` serves the whole
/// file from the start through a fresh handle; otherwise the buffer is
/// opened once and kept open, so repeated calls advance the offset. A
/// single short read is returned as-is; zero bytes signals EOF.
pub async fn read_bytes(
    slot: &SessionSlot,
    inner: &mut SlotInner,
    n: i64,
) -> Result<Vec<u8>, ShimError> {
    match inner.save_mode {
        SaveMode::None => return Err(ShimError::OutputNotSaved),
        SaveMode::Text => return Err(ShimError::NotBinaryFormat),
        SaveMode::Binary => {}
    }
    let path = output_target(slot, inner)?;

    if n < 1 {
        return Ok(tokio::fs::read(&path).await?);
    }

    if inner.out_file.is_none() {
        inner.out_file = Some(File::open(&path).await?);
    }
    let file = inner.out_file.as_mut().expect("opened above");

    let size = file.metadata().await?.len();
    if inner.stream {
        wait_for_data(&path).await?;
    }

    let want = n.min(size as i64).min(i32::MAX as i64).max(0) as usize;
    let mut buf = vec![0u8; want];
    let got = file.read(&mut buf).await?;
    if got == 0 {
        return Err(ShimError::Eof);
    }
    buf.truncate(got);
    Ok(buf)
}

/// Read `n` whole lines from the output buffer (or everything up to EOF if
/// fewer remain). `n < 1` serves the whole file. Zero bytes signals EOF.
pub async fn read_lines(
    slot: &SessionSlot,
    inner: &mut SlotInner,
    n: i64,
) -> Result<Vec<u8>, ShimError> {
    match inner.save_mode {
        SaveMode::None => return Err(ShimError::OutputNotSaved),
        SaveMode::Binary => return Err(ShimError::NotTextFormat),
        SaveMode::Text => {}
    }
    let path = output_target(slot, inner)?;

    if n < 1 {
        return Ok(tokio::fs::read(&path).await?);
    }

    if inner.out_lines.is_none() {
        inner.out_lines = Some(BufReader::new(File::open(&path).await?));
    }
    let reader = inner.out_lines.as_mut().expect("opened above");

    let mut out = String::new();
    for _ in 0..n {
        if reader.read_line(&mut out).await? == 0 {
            break;
        }
    }
    if out.is_empty() {
        return Err(ShimError::Eof);
    }
    Ok(out.into_bytes())
}

/// The file the backend saved into: the pipe when streaming (never in this
/// version), else the output file.
fn output_target(slot: &SessionSlot, inner: &SlotInner) -> Result<std::path::PathBuf, ShimError> {
    let buffers = slot
        .buffers()
        .ok_or_else(|| ShimError::Server("session has no buffers".to_string()))?;
    Ok(if inner.stream {
        buffers.pipe_path
    } else {
        buffers.output_path
    })
}

/// Wait until the target has bytes to offer, in 250 ms ticks. Only the
/// unreachable pipe branch takes this path; a regular file is always
/// readable.
async fn wait_for_data(path: &Path) -> Result<(), ShimError> {
    loop {
        if tokio::fs::metadata(path).await?.len() > 0 {
            return Ok(());
        }
        tokio::time::sleep(POLL_TICK).await;
    }
}
