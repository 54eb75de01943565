use tracing_subscriber::{fmt, EnvFilter};

/// Set to `1` for JSON log lines.
pub const ENV_LOG_JSON: &str = "ESCROW_LOG_JSON";

pub fn init_logging() {
    let use_json = std::env::var(ENV_LOG_JSON).map(|value| value == "1").unwrap_or(false);
    init_logging_with(use_json);
}

/// Logs go to stderr so stdout stays free for command output.
pub fn init_logging_with(use_json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .pretty()
            .with_writer(std::io::stderr)
            .try_init();
    }
}
