pub mod catalog;
pub mod config;
pub mod execution;
pub mod expiry;
pub mod http;
pub mod metrics;
