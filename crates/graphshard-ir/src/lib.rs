//! Graph IR consumed by the graphshard placement and partitioning passes.

pub mod attr;
pub mod builder;
pub mod function;
pub mod verify;

pub use attr::*;
pub use builder::*;
pub use function::*;
pub use verify::*;
