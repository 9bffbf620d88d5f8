//! Gas price and gas limit selection

use crate::chain::ChainClient;
use crate::error::DeployerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Source of the recommended gas price
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// `None` leaves the price for the node to choose
    async fn gas_price(&self) -> DeployerResult<Option<U256>>;
}

/// Uses the node's `eth_gasPrice`
pub struct NodeGasPrice {
    client: Arc<dyn ChainClient>,
}

impl NodeGasPrice {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GasPriceOracle for NodeGasPrice {
    async fn gas_price(&self) -> DeployerResult<Option<U256>> {
        self.client.gas_price().await.map(Some)
    }
}

/// Operator-configured fixed price
pub struct FixedGasPrice(pub U256);

#[async_trait]
impl GasPriceOracle for FixedGasPrice {
    async fn gas_price(&self) -> DeployerResult<Option<U256>> {
        Ok(Some(self.0))
    }
}

/// Gas estimator for transactions
pub struct GasEstimator {
    oracle: Arc<dyn GasPriceOracle>,
}

impl GasEstimator {
    pub fn new(oracle: Arc<dyn GasPriceOracle>) -> Self {
        Self { oracle }
    }

    /// Fill in the gas price from the oracle unless one is already set
    pub async fn set_gas_price(&self, tx: &mut TypedTransaction) -> DeployerResult<()> {
        if tx.gas_price().is_some() {
            return Ok(());
        }

        if let Some(price) = self.oracle.gas_price().await? {
            debug!("Using oracle gas price {}", price);
            tx.set_gas_price(price);
        }
        Ok(())
    }

    /// Fill in the gas limit unless one is already set.
    ///
    /// `estimate` receives a copy of the transaction whose gas is the ceiling
    /// when one is given. `extra` is added to the estimate, and only then is
    /// the result clamped to `ceiling`.
    pub async fn set_gas_limit<F, Fut>(
        &self,
        tx: &mut TypedTransaction,
        estimate: F,
        ceiling: Option<U256>,
        extra: Option<U256>,
    ) -> DeployerResult<()>
    where
        F: FnOnce(TypedTransaction) -> Fut,
        Fut: Future<Output = DeployerResult<U256>>,
    {
        if tx.gas().is_some() {
            return Ok(());
        }

        let mut candidate = tx.clone();
        if let Some(ceiling) = ceiling {
            candidate.set_gas(ceiling);
        }

        let estimated = estimate(candidate).await?;
        let limit = apply_gas_extra(estimated, ceiling, extra);
        debug!(
            "Gas limit {} (estimate {}, extra {:?}, ceiling {:?})",
            limit, estimated, extra, ceiling
        );
        tx.set_gas(limit);
        Ok(())
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit.saturating_mul(gas_price)
    }
}

/// `estimate + extra`, clamped to `ceiling` only when `extra` is given
pub fn apply_gas_extra(estimate: U256, ceiling: Option<U256>, extra: Option<U256>) -> U256 {
    match (extra, ceiling) {
        (Some(extra), Some(ceiling)) => estimate.saturating_add(extra).min(ceiling),
        (Some(extra), None) => estimate.saturating_add(extra),
        (None, _) => estimate,
    }
}
