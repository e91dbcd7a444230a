pub mod cli;
pub mod scrape_config;

pub use cli::LocalStorage;
pub use scrape_config::{ScrapeConfig, DEFAULT_CONFIG_FILE};
