//! Logging bootstrap for binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` overrides the default filter, which keeps the pipeline crates
/// at `info` and everything else at `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "warn,basis_sim=info,basis_pipe=info,basis_paint=info,basis_pk=info,basis_fields=info,basis_grid=info,basis_comm=warn",
        )
    });

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
