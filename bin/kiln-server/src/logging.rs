//! Tracing subscriber setup: `RUST_LOG` wins when set and valid, otherwise
//! falls back to the resolved `--log-level`/`KILN_LOG` value, with optional
//! JSON output for log aggregators.

use crate::config::ServerConfig;

/// Installs the global tracing subscriber. Must run once, before any other
/// module logs — [`crate::main`] calls this immediately after resolving
/// [`ServerConfig`].
pub fn init(config: &ServerConfig) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match config.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: KILN_LOG='{}' is not a valid tracing filter ({e}); \
                     falling back to 'info'",
                    config.log_level
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
