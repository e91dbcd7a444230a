pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod phylo;
pub mod utils;

pub use app::{Collaborators, DataScrapePipeline};
pub use config::{LocalStorage, ScrapeConfig, DEFAULT_CONFIG_FILE};
pub use core::ScrapeEngine;
pub use utils::error::{Result, ScrapeError};
