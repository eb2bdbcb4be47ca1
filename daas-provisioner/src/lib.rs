//! Orchestration core for per-tenant SQL Server provisioning.
//!
//! Contains the building blocks of the provisioning control plane: the
//! cluster client abstraction ([`k8s`]), deterministic resource naming and
//! spec builders ([`resources`]), the filterable resource event bus and watch
//! actor ([`events`]), and the [`runner::SqlRunner`] state machine that
//! executes T-SQL against a provisioned server through a one-shot cluster
//! job.

pub mod concurrency;
pub mod events;
pub mod k8s;
pub mod model;
pub mod resources;
pub mod runner;
pub mod workers;
