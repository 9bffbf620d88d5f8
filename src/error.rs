//! Error types for the Tesseract Deployer

use thiserror::Error;

/// Main error type for deployment and transaction orchestration
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Can't link '{library}' ({tag}): no matching placeholder in bytecode")]
    Link { library: String, tag: String },

    #[error("Link reference for '{library}' at byte {start} (length {length}) is outside the bytecode")]
    LinkReferenceOutOfRange {
        library: String,
        start: usize,
        length: usize,
    },

    #[error("Bytecode is not fully linked: {0}")]
    UnlinkedBytecode(String),

    #[error("No signer for {address}")]
    NoSigner { address: String },

    #[error("Invalid sender identifier: {0}")]
    InvalidFrom(String),

    #[error("No method named \"{method}\" on contract deployed as \"{name}\"")]
    NoMethod { name: String, method: String },

    #[error("Field {field} not specified in new transaction, can't compare")]
    FieldComparison { field: String },

    #[error("Contract not deployed: receipt for {tx_hash} has no contract address")]
    ContractNotDeployed { tx_hash: String },

    #[error("ABORT, ACTION REQUIRED: execute the following as {from}: {description}")]
    AbortRequiresManualAction { from: String, description: String },

    #[error("No deployment named \"{name}\"")]
    DeploymentNotFound { name: String },

    #[error("No artifact named \"{name}\"")]
    ArtifactNotFound { name: String },

    #[error("ABI error: {0}")]
    Abi(#[from] ethers::abi::Error),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Check if error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployerError::ChainConnection(_) | DeployerError::Timeout { .. }
        )
    }

    /// Check if the caller has to act out-of-band before retrying
    pub fn requires_manual_action(&self) -> bool {
        matches!(
            self,
            DeployerError::AbortRequiresManualAction { .. } | DeployerError::NoSigner { .. }
        )
    }
}

/// Result type for deployer operations
pub type DeployerResult<T> = Result<T, DeployerError>;
