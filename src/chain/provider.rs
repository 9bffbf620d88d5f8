//! Chain provider with multi-RPC support and automatic failover

use super::ChainClient;
use crate::config::NetworkConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::tx::nonce::u256_to_u64;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: NetworkConfig) -> DeployerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for network {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DeployerError::Config(format!(
                "No valid RPC providers for network {}",
                config.name
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Network {} failover to provider {}", self.config.name, next);
    }

    /// Network name
    pub fn network(&self) -> &str {
        &self.config.name
    }

    /// Run an idempotent read, failing over across providers
    async fn read<T, F, Fut>(&self, method: &str, op: F) -> DeployerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "{} failed on network {}: {}",
                        method, self.config.name, e
                    );
                    self.failover();
                }
            }
        }

        Err(DeployerError::ChainConnection(format!(
            "All providers failed for {} on network {}",
            method, self.config.name
        )))
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    async fn chain_id(&self) -> DeployerResult<u64> {
        let chain_id = self
            .read("eth_chainId", |p| async move { p.get_chainid().await })
            .await?;
        u256_to_u64(chain_id).ok_or_else(|| {
            DeployerError::ChainConnection(format!(
                "Chain id {} of network {} does not fit in 64 bits",
                chain_id, self.config.name
            ))
        })
    }

    async fn accounts(&self) -> DeployerResult<Vec<Address>> {
        self.read("eth_accounts", |p| async move { p.get_accounts().await })
            .await
    }

    async fn get_transaction(&self, tx_hash: H256) -> DeployerResult<Option<Transaction>> {
        self.read("eth_getTransactionByHash", |p| async move {
            p.get_transaction(tx_hash).await
        })
        .await
    }

    async fn get_transaction_count(&self, address: Address) -> DeployerResult<U256> {
        self.read("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
        })
        .await
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| DeployerError::ChainConnection(e.to_string()))
    }

    async fn gas_price(&self) -> DeployerResult<U256> {
        self.read("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
            .map_err(|e| DeployerError::GasEstimation(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| DeployerError::GasEstimation(e.to_string()))
    }

    async fn call(&self, tx: &TypedTransaction) -> DeployerResult<Bytes> {
        self.http()
            .call(tx, None)
            .await
            .map_err(|e| DeployerError::Transaction(e.to_string()))
    }

    async fn send_transaction(&self, tx: &TypedTransaction) -> DeployerResult<H256> {
        self.http()
            .request::<_, H256>("eth_sendTransaction", [tx])
            .await
            .map_err(|e| DeployerError::Transaction(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| DeployerError::Transaction(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn mine(&self) -> DeployerResult<()> {
        self.http()
            .request::<_, serde_json::Value>("evm_mine", Vec::<serde_json::Value>::new())
            .await
            .map(|_| ())
            .map_err(|e| DeployerError::ChainConnection(e.to_string()))
    }
}
