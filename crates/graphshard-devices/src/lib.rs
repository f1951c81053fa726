//! Device identity and kernel availability for graphshard.

pub mod device;
pub mod registry;

pub use device::*;
pub use registry::*;
