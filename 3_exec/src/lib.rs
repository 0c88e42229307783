pub mod cpu;
pub mod registry;

mod config;
mod error;

pub use config::{CpuConfig, IM2COL_NUMEL_LIMIT};
pub use error::ExecError;
pub use registry::{Backend, OperatorEntry, Registry};
