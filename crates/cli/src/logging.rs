use tracing_subscriber::EnvFilter;

/// Variable holding an `EnvFilter` directive, e.g. `DUNE_LOG=dune_client=debug`.
pub(crate) const ENV_LOG: &str = "DUNE_LOG";

/// Install a stderr subscriber so that stdout stays machine-readable.
///
/// `DUNE_LOG` wins over `--verbose`; without either only warnings print.
pub(crate) fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = std::env::var(ENV_LOG)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
