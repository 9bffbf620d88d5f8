//! Transaction preparation and submission: signers, gas, nonces, broadcast

pub mod gas;
pub mod nonce;
pub mod sender;
pub mod signer;

pub use gas::{apply_gas_extra, FixedGasPrice, GasEstimator, GasPriceOracle, NodeGasPrice};
pub use nonce::{NonceManager, NonceRequest};
pub use sender::{NoopHook, PendingTx, PendingTxHook, TransactionSender};
pub use signer::{is_private_key, SignerHandle, SignerResolver};
