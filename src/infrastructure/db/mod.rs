pub mod analyses;
pub mod connection;
pub mod conversion_cache;
