pub mod api;
pub mod extractors;
pub mod models;
pub mod utils;
