pub mod pipelines;
pub mod scraper;

#[cfg(test)]
pub(crate) mod test_support;

pub use pipelines::data_scrape_pipeline::{Collaborators, DataScrapePipeline};
pub use scraper::{ScrapeTools, Scraper};
