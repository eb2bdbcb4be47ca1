//! Filterable publish/subscribe distribution of cluster change events.
//!
//! The [`bus`] module holds the in-memory subscription registry, and the
//! [`watch`] module wraps it in an actor that owns the upstream watch stream
//! for a single resource kind.

pub mod bus;
pub mod watch;
