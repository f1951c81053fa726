//! Device placement policy and graph partitioning for graphshard.

pub mod info;
pub mod partition;

pub use info::*;
pub use partition::*;
