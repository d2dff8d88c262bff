//! Helper utilities.

pub mod container;

pub use container::{container_id, is_container};
