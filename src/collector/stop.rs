//! Stop signalling for acquisition loops.
//!
//! A loop polls a shared [`StopFlag`] between captures. The flag is set from
//! Ctrl+C or from a listener thread waiting for a stop key on a line-oriented
//! reader (usually stdin). A capture already in progress still completes.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Key that stops a capture session when entered on its own line.
pub const DEFAULT_STOP_KEY: &str = "q";

/// Shared stop request.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set this flag when the process receives Ctrl+C.
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived Ctrl+C, finishing current capture...");
            flag.stop();
        })
    }
}

/// Watch `reader` for a line equal to `key` and set `flag` when it appears.
///
/// The thread ends at the stop key, at end of input, or on a read error.
pub fn spawn_key_listener<R>(reader: R, key: impl Into<String>, flag: StopFlag) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    let key = key.into();
    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) if line.trim() == key => {
                    tracing::info!("Stop key '{key}' pressed");
                    flag.stop();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Stop key listener failed: {}", e);
                    return;
                }
            }
        }
    })
}
