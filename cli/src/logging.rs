use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "pantry=info,pantry_core=info";
const VERBOSE_FILTER: &str = "pantry=debug,pantry_core=debug";

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
/// Output goes to stderr so `--json` output on stdout stays parseable.
pub fn init(verbose: bool, json: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init: a subscriber may already be installed.
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.compact().try_init();
    }
}
