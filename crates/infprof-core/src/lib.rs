//! infprof-core: metric collection and export library for the infprof profiler.
//!
//! Provides:
//! - `collector`: probe primitives, per-subsystem collectors and the `Registry`
//! - `model`: tagged values, samples and static info
//! - `export`: flattening of samples into rows and tabular output (CSV/TSV/Parquet)
//! - `storage`: durable per-session snapshot files
//! - `session`: the polling scheduler (`Profiler`)
//! - `config`: profiler configuration
//! - `util`: container identity helpers

pub mod collector;
pub mod config;
pub mod export;
pub mod model;
pub mod session;
pub mod storage;
pub mod util;
