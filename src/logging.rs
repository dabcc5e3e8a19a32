//! Tracing subscriber setup for the binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count, falling back to `configured`.
#[must_use]
pub fn directive(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install a stderr subscriber. `RUST_LOG` takes precedence over `directive`.
///
/// # Errors
///
/// Returns an error if the directive is invalid or a subscriber is already
/// installed.
pub fn init(directive: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directive))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .compact()
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_config() {
        assert_eq!(directive(0, "warn"), "warn");
        assert_eq!(directive(1, "warn"), "info");
        assert_eq!(directive(2, "warn"), "debug");
        assert_eq!(directive(5, "warn"), "trace");
    }
}
