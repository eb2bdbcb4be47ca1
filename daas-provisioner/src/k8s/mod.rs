//! Kubernetes integration for the provisioning control plane.
//!
//! This module contains the abstraction and implementation used by the
//! orchestration actors to manage cluster resources (services, secrets,
//! config maps, and jobs). Consumers should depend on the [`ResourceOps`]
//! trait and avoid relying on a specific transport.
//!
//! The default client, [`http::KubeClusterClient`], is backed by the [`kube`]
//! crate and talks to the cluster using the ambient configuration (in-cluster
//! or local `~/.kube/config`). Keeping the abstraction in [`base`] lets us
//! swap implementations in tests and non-Kubernetes environments.

mod base;
pub mod http;

pub use base::*;
