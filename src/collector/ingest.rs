//! JSON-lines capture feed.
//!
//! Lines are read on a helper thread so a stop request is noticed even while
//! the input is idle. The helper may stay blocked on its read after the feed
//! ends; it exits on its next line or at end of input.

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::collector::recorder::{RecorderError, SnapshotSender};
use crate::collector::stop::StopFlag;
use crate::collector::types::IngestLine;

/// How often an idle feed re-checks the stop flag.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Counts of one ingest session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Snapshots handed to the recorder
    pub queued: usize,
    /// Lines that were not valid snapshots
    pub rejected: usize,
    /// Whether the session ended on a stop request rather than end of input
    pub stopped: bool,
}

/// Read snapshots from `reader` until end of input or a stop request.
///
/// Blank lines are ignored; undecodable lines are logged and counted. A stop
/// request ends the feed within [`STOP_POLL_INTERVAL`] even when no input
/// arrives.
pub fn ingest_lines<R>(
    reader: R,
    sender: &SnapshotSender,
    stop: &StopFlag,
    offset_ms: i64,
) -> Result<IngestSummary, RecorderError>
where
    R: BufRead + Send + 'static,
{
    let (line_tx, line_rx) = bounded(64);
    thread::Builder::new()
        .name("ingest-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if line_tx.send(line).is_err() || failed {
                    return;
                }
            }
        })
        .map_err(RecorderError::Spawn)?;

    let mut summary = IngestSummary::default();
    let mut index = 0;

    loop {
        if stop.is_stopped() {
            summary.stopped = true;
            break;
        }

        let line = match line_rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                tracing::warn!("Input read failed at line {}: {}", index + 1, e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        index += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<IngestLine>(&line) {
            Ok(parsed) => {
                sender.send(parsed.into_snapshot(offset_ms))?;
                summary.queued += 1;
            }
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", index, e);
                summary.rejected += 1;
            }
        }
    }

    if stop.is_stopped() {
        summary.stopped = true;
    }
    Ok(summary)
}
