//! Deployment orchestration
//!
//! This module provides:
//! - Request and result types for deploy, execute, batch, raw and read calls
//! - Redeploy detection against recorded deployments
//! - The `DeploymentSession` tying signers, gas, nonces and receipts together

pub mod diff;
pub mod session;
pub mod types;

pub use diff::DeploymentDiffer;
pub use session::DeploymentSession;
pub use types::{
    encode_creation_data, BatchOptions, CallOptions, DeployOptions, DeployResult, DeployStage,
    ExecuteRequest, ManualAction, RawTxRequest, TxField, TxOptions,
};
