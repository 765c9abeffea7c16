pub mod cache;
pub mod config;
pub mod error;
pub mod profile;
pub mod similarity_metric;
pub mod trace;
