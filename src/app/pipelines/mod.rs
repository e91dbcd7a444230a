pub mod data_scrape_pipeline;

pub use data_scrape_pipeline::{Collaborators, DataScrapePipeline, CHECKPOINT_FILE};
