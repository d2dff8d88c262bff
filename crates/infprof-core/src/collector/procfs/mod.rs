//! Host collectors backed by `/proc` and `/sys`.

mod cpu;
mod disk;
pub mod host;
mod memory;
mod network;
pub mod parser;
mod process;

pub use cpu::CpuCollector;
pub use disk::DiskCollector;
pub use memory::{MemoryCollector, MemorySummary};
pub use network::{NetworkCollector, read_net_totals};
pub use parser::ParseError;
pub use process::ProcessCollector;
