/// Logging initialization.
///
/// Always logs to stderr. When `data_dir` is writable, also appends to
/// `<data_dir>/switchboard.log` so a host app's logs can be pulled off the
/// device after the fact.
///
/// `RUST_LOG` wins over the built-in filter. Called once at the start of
/// `FfiApp::new()`; later calls are no-ops.
pub fn init_logging(data_dir: &str) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "switchboard_core=debug,info".into());

    let file_layer = if data_dir.trim().is_empty() {
        None
    } else {
        let log_path = std::path::Path::new(data_dir).join("switchboard.log");
        let _ = std::fs::create_dir_all(data_dir);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            })
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
