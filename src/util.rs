use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn setup_logging(log_level: &str) {
    let mut filter = EnvFilter::from_default_env()
        .add_directive("tungstenite=info".parse().expect("static directive"))
        .add_directive("tokio_tungstenite=info".parse().expect("static directive"));
    match log_level.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level {:?}: {}", log_level, e),
    }

    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(filter)
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Fresh correlation token for an outbound command.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Wall-clock time as shown next to log entries.
pub fn local_time() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
