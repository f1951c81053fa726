//! graphshard compiler facade.

#[cfg(feature = "cli")]
pub mod cli;
pub mod pipeline;

#[cfg(feature = "cli")]
pub use cli::*;
pub use pipeline::*;
