//! Configuration structures shared between the control plane crates.

mod agent;
mod base;
mod cluster;

pub use agent::*;
pub use base::*;
pub use cluster::*;
