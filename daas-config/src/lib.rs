//! Configuration loading for the DaaS control plane.
//!
//! Configuration is assembled from YAML files plus environment variable
//! overrides, with the active [`Environment`] selecting which overlay file is
//! applied on top of the base configuration.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
