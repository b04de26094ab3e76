use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "murmur_core=debug,murmur_sqlite_storage=info,info";

/// Logging initialization.
///
/// - stderr via tracing-subscriber::fmt, filtered by `RUST_LOG`
/// - with a data dir, also `<data_dir>/murmur.log` (no ANSI) so logs survive
///   the process and can be pulled off a device
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(data_dir: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let file_layer = data_dir.and_then(|dir| {
        let _ = std::fs::create_dir_all(dir);
        let log_path = std::path::Path::new(dir).join("murmur.log");
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            })
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
