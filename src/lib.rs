// Public API - configuration, probe engine, and result types
pub mod config;
pub mod probe;
pub mod report;
pub mod runner;

// Internal implementation - not part of public API
pub(crate) mod cli;
