//! Captures the log messages of the kernel, so that tests can check what it reported.
//!
//! Only records targeted at `procsim` are kept. The buffer is global, so a test checking logs
//! should live in its own test binary.
//!
//! ```
//! # fn main() -> anyhow::Result<()> {
//! testing::logger::capture(log::LevelFilter::Debug)?;
//! log::debug!(target: "procsim", "kept");
//! log::debug!(target: "elsewhere", "skipped");
//! log::trace!(target: "procsim", "too verbose");
//! assert_eq!(testing::logger::drain()?, vec![String::from("[DEBUG] kept")]);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use log::LevelFilter;

const TARGET: &str = "procsim";

lazy_static::lazy_static! {
    static ref CAPTURED: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    static ref INSTALLED: Mutex<bool> = Mutex::new(false);
}

/// Starts capturing kernel messages up to `level`.
///
/// Only the first call installs the logger; later calls keep its level.
///
/// # Errors
///
/// Fails if a different logger is already installed.
pub fn capture(level: LevelFilter) -> anyhow::Result<()> {
    let mut installed = INSTALLED.lock().map_err(|err| anyhow!("{}", err))?;
    if *installed {
        return Ok(());
    }
    let captured = Arc::clone(&CAPTURED);
    fern::Dispatch::new()
        .level(level)
        .filter(|metadata| metadata.target().starts_with(TARGET))
        .chain(fern::Output::call(move |record| {
            let line = format!("{:<7} {}", format!("[{}]", record.level()), record.args());
            if let Ok(mut captured) = captured.lock() {
                captured.push(line);
            }
        }))
        .apply()?;
    *installed = true;
    Ok(())
}

/// Takes out the messages captured so far.
///
/// # Errors
///
/// Fails if a thread panicked while holding the buffer.
pub fn drain() -> anyhow::Result<Vec<String>> {
    let mut captured = CAPTURED.lock().map_err(|err| anyhow!("{}", err))?;
    Ok(captured.drain(..).collect())
}
