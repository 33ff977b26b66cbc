use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set up logs
pub fn setup_logs(debug: bool) {
    // `RUST_LOG` wins when present; the debug flag only raises the default.
    let default_directive = if debug {
        "gamehub=debug,warn"
    } else {
        "gamehub=info,warn"
    };
    let log_level = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive.into());

    tracing_subscriber::registry()
        .with(log_level)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_target(false),
        )
        .init();
}
