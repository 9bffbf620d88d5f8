//! Deployment records and their persistence
//!
//! Handles:
//! - The `Deployment` record written after a confirmed deploy
//! - The `DeploymentStore` seam to external persistence
//! - An in-memory store for tests and ephemeral networks

mod store;

pub use store::{Deployment, DeploymentStore, MemoryStore, PendingDeployment};
