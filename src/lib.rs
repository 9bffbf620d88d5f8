//! Tesseract Deployer - idempotent contract deployment for EVM chains
//!
//! Links and deploys compiled contracts, skips deployments whose transaction
//! would not change, sequences nonces for batched calls and waits for receipts.

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod deploy;
pub mod error;
pub mod metrics;
pub mod state;
pub mod tx;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::{Artifact, ArtifactRegistry, ArtifactSource};
pub use chain::{ChainClient, ChainProvider, PollPolicy, ReceiptWaiter};
pub use config::Settings;
pub use deploy::{
    BatchOptions, CallOptions, DeployOptions, DeployResult, DeploymentSession, ExecuteRequest,
    RawTxRequest, TxField, TxOptions,
};
pub use error::{DeployerError, DeployerResult};
pub use state::{Deployment, DeploymentStore, MemoryStore};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is harmless.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tesseract_deployer=debug,hyper=warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
