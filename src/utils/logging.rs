use std::env;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "LUMINA_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Installs the stderr subscriber. `LUMINA_LOG` wins over `RUST_LOG`, which
/// wins over `level` (the `--log-level` flag).
pub fn init_tracing(level: Option<&str>) {
    let directive = filter_directive(
        env::var(LOG_ENV).ok(),
        env::var(EnvFilter::DEFAULT_ENV).ok(),
        level,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("Ignoring invalid log filter {directive:?}: {err}");
        EnvFilter::new(DEFAULT_LEVEL)
    });

    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn filter_directive(
    lumina_log: Option<String>,
    rust_log: Option<String>,
    level: Option<&str>,
) -> String {
    [lumina_log, rust_log, level.map(str::to_string)]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_is_env_then_flag_then_default() {
        assert_eq!(
            filter_directive(Some("debug".into()), Some("info".into()), Some("error")),
            "debug"
        );
        assert_eq!(
            filter_directive(None, Some("lumina=trace".into()), Some("error")),
            "lumina=trace"
        );
        assert_eq!(filter_directive(None, None, Some("info")), "info");
        assert_eq!(filter_directive(Some("  ".into()), None, None), "warn");
    }
}
