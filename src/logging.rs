use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize console logging. `RUST_LOG` overrides the default level;
/// `verbose` lowers it to debug for this crate.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "osta=debug" } else { "osta=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so that previews on stdout stay clean.
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}
