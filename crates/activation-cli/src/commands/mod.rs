pub mod activate;
pub mod analytics;
