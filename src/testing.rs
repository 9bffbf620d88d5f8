//! In-memory development chain for session tests

use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, NameOrAddress, Transaction, TransactionReceipt, H256, U256, U64,
};
use ethers::utils::{get_contract_address, keccak256};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct DevChainState {
    nonces: HashMap<Address, u64>,
    transactions: HashMap<H256, Transaction>,
    receipts: HashMap<H256, TransactionReceipt>,
    pending: Vec<H256>,
    block: u64,
    mine_calls: usize,
    sent: usize,
}

/// Node managing a fixed set of accounts.
///
/// With auto-mining off, transactions stay pending until `evm_mine`.
pub struct DevChain {
    accounts: Vec<Address>,
    auto_mine: bool,
    gas_estimate: U256,
    call_result: Bytes,
    drop_contract_address: bool,
    state: Mutex<DevChainState>,
}

impl DevChain {
    pub fn new(accounts: Vec<Address>) -> Self {
        Self {
            accounts,
            auto_mine: true,
            gas_estimate: U256::from(100_000),
            call_result: Bytes::default(),
            drop_contract_address: false,
            state: Mutex::new(DevChainState::default()),
        }
    }

    pub fn manual_mining(mut self) -> Self {
        self.auto_mine = false;
        self
    }

    pub fn with_call_result(mut self, result: Bytes) -> Self {
        self.call_result = result;
        self
    }

    /// Creation receipts come back without a contract address
    pub fn without_contract_addresses(mut self) -> Self {
        self.drop_contract_address = true;
        self
    }

    pub fn mine_calls(&self) -> usize {
        self.state.lock().unwrap().mine_calls
    }

    pub fn sent(&self) -> usize {
        self.state.lock().unwrap().sent
    }

    pub fn transaction(&self, hash: H256) -> Option<Transaction> {
        self.state.lock().unwrap().transactions.get(&hash).cloned()
    }

    /// Forget a transaction, as a node that pruned or reorged it would
    pub fn forget(&self, hash: H256) {
        let mut state = self.state.lock().unwrap();
        state.transactions.remove(&hash);
        state.receipts.remove(&hash);
    }

    fn mine_pending(&self, state: &mut DevChainState) {
        state.block += 1;
        let block = U64::from(state.block);
        for hash in std::mem::take(&mut state.pending) {
            if let Some(tx) = state.transactions.get_mut(&hash) {
                tx.block_number = Some(block);
                let contract_address = if tx.to.is_none() && !self.drop_contract_address {
                    Some(get_contract_address(tx.from, tx.nonce))
                } else {
                    None
                };
                state.receipts.insert(
                    hash,
                    TransactionReceipt {
                        transaction_hash: hash,
                        block_number: Some(block),
                        from: tx.from,
                        to: tx.to,
                        contract_address,
                        gas_used: Some(tx.gas),
                        status: Some(U64::one()),
                        ..Default::default()
                    },
                );
            }
        }
    }
}

#[async_trait]
impl ChainClient for DevChain {
    async fn chain_id(&self) -> DeployerResult<u64> {
        Ok(31337)
    }

    async fn accounts(&self) -> DeployerResult<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn get_transaction(&self, tx_hash: H256) -> DeployerResult<Option<Transaction>> {
        Ok(self.transaction(tx_hash))
    }

    async fn get_transaction_count(&self, address: Address) -> DeployerResult<U256> {
        let state = self.state.lock().unwrap();
        Ok(state.nonces.get(&address).copied().unwrap_or(0).into())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn gas_price(&self) -> DeployerResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> DeployerResult<U256> {
        Ok(self.gas_estimate)
    }

    async fn call(&self, _tx: &TypedTransaction) -> DeployerResult<Bytes> {
        Ok(self.call_result.clone())
    }

    async fn send_transaction(&self, tx: &TypedTransaction) -> DeployerResult<H256> {
        let from = tx
            .from()
            .copied()
            .filter(|from| self.accounts.contains(from))
            .ok_or_else(|| DeployerError::Transaction("unknown account".to_string()))?;

        let mut state = self.state.lock().unwrap();
        let expected = state.nonces.get(&from).copied().unwrap_or(0);
        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or(expected);
        if nonce != expected {
            return Err(DeployerError::Transaction(format!(
                "nonce {} does not match account nonce {}",
                nonce, expected
            )));
        }
        state.nonces.insert(from, nonce + 1);

        let hash = H256::from(keccak256(
            [from.as_bytes(), &nonce.to_be_bytes()[..]].concat(),
        ));
        let to = match tx.to() {
            Some(NameOrAddress::Address(address)) => Some(*address),
            _ => None,
        };
        state.transactions.insert(
            hash,
            Transaction {
                hash,
                nonce: nonce.into(),
                from,
                to,
                value: tx.value().copied().unwrap_or_default(),
                gas: tx.gas().copied().unwrap_or_default(),
                gas_price: tx.gas_price(),
                input: tx.data().cloned().unwrap_or_default(),
                ..Default::default()
            },
        );
        state.pending.push(hash);
        state.sent += 1;

        if self.auto_mine {
            self.mine_pending(&mut state);
        }
        Ok(hash)
    }

    async fn send_raw_transaction(&self, _raw: Bytes) -> DeployerResult<H256> {
        Err(DeployerError::Transaction(
            "raw transactions are not supported".to_string(),
        ))
    }

    async fn mine(&self) -> DeployerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mine_calls += 1;
        self.mine_pending(&mut state);
        Ok(())
    }
}
