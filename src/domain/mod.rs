// Domain layer: models, ports and the data-handling rules of a scrape run.

pub mod att;
pub mod ids;
pub mod model;
pub mod ports;
pub mod selection;
