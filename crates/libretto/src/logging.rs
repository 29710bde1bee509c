//! Logging setup for the host process.
//!
//! The library itself logs through the `log` macros; `tracing_log::LogTracer`
//! bridges those into the tracing subscriber installed here. The UI shell
//! calls [`init`] once at startup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: `LIBRETTO_LOG` (or the given default
/// directive) filters, compact console output.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    // ok() in case a host already installed a bridge.
    tracing_log::LogTracer::init().ok();

    let filter = EnvFilter::try_from_env("LIBRETTO_LOG")
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("info");
        init("debug");
        log::info!("logging initialized twice without panicking");
    }
}
