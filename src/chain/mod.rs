//! Chain module - the execution environment seen by the deployer
//!
//! This module provides:
//! - The `ChainClient` abstraction over the JSON-RPC methods the deployer needs
//! - A multi-RPC `ChainProvider` with automatic failover
//! - Receipt polling with a configurable policy

pub mod provider;
pub mod receipt;

pub use provider::ChainProvider;
pub use receipt::{PollPolicy, ReceiptWaiter};

use crate::error::DeployerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};

/// JSON-RPC surface of an execution environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_chainId`
    async fn chain_id(&self) -> DeployerResult<u64>;

    /// `eth_accounts` - accounts managed (and signable) by the node
    async fn accounts(&self) -> DeployerResult<Vec<Address>>;

    /// `eth_getTransactionByHash`
    async fn get_transaction(&self, tx_hash: H256) -> DeployerResult<Option<Transaction>>;

    /// `eth_getTransactionCount` against the pending block
    async fn get_transaction_count(&self, address: Address) -> DeployerResult<U256>;

    /// `eth_getTransactionReceipt`
    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> DeployerResult<U256>;

    /// `eth_estimateGas`
    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256>;

    /// `eth_call` against the latest block
    async fn call(&self, tx: &TypedTransaction) -> DeployerResult<Bytes>;

    /// `eth_sendTransaction` - signed by the node for one of its managed accounts
    async fn send_transaction(&self, tx: &TypedTransaction) -> DeployerResult<H256>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256>;

    /// `evm_mine` - development networks only
    async fn mine(&self) -> DeployerResult<()>;
}
