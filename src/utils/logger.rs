use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `level` 來自設定檔 [monitoring].log_level，RUST_LOG 優先
pub fn init_cli_logger_with_level(verbose: bool, level: Option<&str>) {
    let default_directive = if verbose {
        "phylo_scrape=debug,info".to_string()
    } else {
        match level {
            Some(level) => format!("phylo_scrape={}", level),
            None => "phylo_scrape=info".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines for batch runs whose logs are collected by a scheduler.
pub fn init_json_logger() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("phylo_scrape=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}
