//! Test doubles: an in-memory filesystem with host scenarios and a fake GPU driver.

mod filesystem;
mod gpu;
mod scenarios;

pub use filesystem::MockFs;
pub use gpu::{MockDevice, MockGpu};
