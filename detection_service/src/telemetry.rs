use crate::config::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON logs; `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(log_level: &LogLevel) {
    let directives = format!("{},ort=info,h2=info,tower=info", log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directives.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}
