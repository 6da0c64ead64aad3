//! Tracing setup for the command line front-end.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "FILESAGE_LOG";

/// Install a stderr subscriber. `FILESAGE_LOG` wins over the verbosity flags.
pub fn init(verbose: u8, silent: bool) {
    let default = default_filter(verbose, silent);
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .try_init();
}

fn default_filter(verbose: u8, silent: bool) -> &'static str {
    if silent {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}
