// src/core/mod.rs

//! The caching core: cache stores, time-series model, origins and the request engines.

pub mod cache;
pub mod engine;
pub mod errors;
pub mod headers;
pub mod metrics;
pub mod origin;
pub mod tasks;
pub mod timeseries;

pub use errors::DeltaCacheError;
