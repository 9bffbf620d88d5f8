//! Transaction signing and broadcast

use super::signer::SignerHandle;
use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};
use crate::state::PendingDeployment;

use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A broadcast transaction that has not been confirmed yet
#[derive(Debug, Clone)]
pub struct PendingTx {
    pub hash: H256,
    pub from: Address,
    pub nonce: Option<U256>,
    /// The transaction as it was submitted
    pub tx: TypedTransaction,
}

/// Invoked with every pending transaction before confirmation is awaited.
///
/// The returned handle is the one waited on.
#[async_trait]
pub trait PendingTxHook: Send + Sync {
    async fn on_pending(
        &self,
        pending: PendingTx,
        name: Option<&str>,
        deployment: Option<&PendingDeployment>,
    ) -> DeployerResult<PendingTx>;
}

/// Hook that passes the handle through
pub struct NoopHook;

#[async_trait]
impl PendingTxHook for NoopHook {
    async fn on_pending(
        &self,
        pending: PendingTx,
        _name: Option<&str>,
        _deployment: Option<&PendingDeployment>,
    ) -> DeployerResult<PendingTx> {
        Ok(pending)
    }
}

/// Signs and broadcasts transactions
pub struct TransactionSender {
    client: Arc<dyn ChainClient>,
    hook: Arc<dyn PendingTxHook>,
}

impl TransactionSender {
    pub fn new(client: Arc<dyn ChainClient>, hook: Arc<dyn PendingTxHook>) -> Self {
        Self { client, hook }
    }

    /// Sign (locally or via the node) and broadcast `tx`
    pub async fn send(
        &self,
        signer: &SignerHandle,
        mut tx: TypedTransaction,
        kind: &'static str,
    ) -> DeployerResult<PendingTx> {
        let from = signer.address();
        tx.set_from(from);

        let result = match signer {
            SignerHandle::Local(wallet) => {
                tx.set_chain_id(wallet.chain_id());
                if tx.gas_price().is_none() {
                    tx.set_gas_price(self.client.gas_price().await?);
                }

                let signature = wallet
                    .sign_transaction(&tx)
                    .await
                    .map_err(|e| DeployerError::Wallet(e.to_string()))?;
                self.client
                    .send_raw_transaction(tx.rlp_signed(&signature))
                    .await
            }
            SignerHandle::Managed(_) => self.client.send_transaction(&tx).await,
        };

        match result {
            Ok(hash) => {
                info!("Transaction sent: {:?} from {:?}", hash, from);
                crate::metrics::record_tx_submitted(kind);
                Ok(PendingTx {
                    hash,
                    from,
                    nonce: tx.nonce().copied(),
                    tx,
                })
            }
            Err(e) => {
                error!("Failed to send {} transaction from {:?}: {}", kind, from, e);
                crate::metrics::record_tx_failed(kind);
                Err(e)
            }
        }
    }

    /// Broadcast `tx` and hand the pending handle to the hook
    pub async fn submit(
        &self,
        signer: &SignerHandle,
        tx: TypedTransaction,
        name: Option<&str>,
        deployment: Option<&PendingDeployment>,
        kind: &'static str,
    ) -> DeployerResult<PendingTx> {
        let pending = self.send(signer, tx, kind).await?;
        self.hook.on_pending(pending, name, deployment).await
    }

    /// Ask a development node to mine a block; failures are ignored
    pub async fn force_mine(&self) {
        if let Err(e) = self.client.mine().await {
            debug!("evm_mine failed (ignored): {}", e);
        }
    }
}
