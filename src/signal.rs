//! Ctrl-C handling.
//!
//! The first interrupt asks the running scan to stop at the next entry so the
//! run stays resumable. A second one exits immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use color_eyre::eyre::{Context, Result};

/// Exit code after an interrupt (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Install the handler and return the flag it sets.
pub fn install() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);

    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(EXIT_CODE_INTERRUPTED);
        }
        eprintln!("\nInterrupted. Finishing current batch...");
    })
    .context("Failed to install Ctrl-C handler")?;

    Ok(flag)
}
