pub mod cache_key;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod resilient_provider;
pub mod retry;
pub mod spec_conversion;
