pub mod engine;

pub use crate::domain::ports::{Pipeline, Storage};
pub use engine::ScrapeEngine;
