//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Per-sender local nonce tracking to avoid conflicts between concurrent calls
//! - Batch sequencing: every nonce of a batch is assigned before anything is sent
//! - Releasing a nonce whose broadcast failed, resyncing with the chain when
//!   that would leave a gap

use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};

use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-sender nonce state
#[derive(Debug, Default)]
struct SenderNonceState {
    /// Next nonce this session would hand out (0 until something is allocated)
    next: u64,
}

/// A transaction waiting for a nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRequest {
    pub sender: Address,
    /// Nonce pinned by the caller
    pub explicit: Option<u64>,
}

impl NonceRequest {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            explicit: None,
        }
    }

    pub fn with_nonce(sender: Address, nonce: u64) -> Self {
        Self {
            sender,
            explicit: Some(nonce),
        }
    }
}

/// Manages nonces for every sender used by a session
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    senders: DashMap<Address, Arc<Mutex<SenderNonceState>>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            senders: DashMap::new(),
        }
    }

    fn state(&self, sender: Address) -> Arc<Mutex<SenderNonceState>> {
        self.senders.entry(sender).or_default().clone()
    }

    /// Allocate the next nonce for a single transaction
    pub async fn next_nonce(&self, sender: Address) -> DeployerResult<u64> {
        let state = self.state(sender);
        let mut state = state.lock().await;

        let on_chain = self.fetch_nonce(sender).await?;
        let nonce = on_chain.max(state.next);
        state.next = nonce + 1;

        debug!("Allocated nonce {} for {:?} (on-chain {})", nonce, sender, on_chain);
        Ok(nonce)
    }

    /// Record a nonce chosen by the caller so later allocations skip past it
    pub async fn observe(&self, sender: Address, nonce: u64) {
        let state = self.state(sender);
        let mut state = state.lock().await;
        if nonce >= state.next {
            state.next = nonce + 1;
        }
    }

    /// Release a nonce (broadcast failed, can be reused).
    ///
    /// The most recent allocation is handed back directly. An older one
    /// leaves a gap, so the sender is resynced with the chain instead.
    pub async fn release_nonce(&self, sender: Address, nonce: u64) {
        let state = self.state(sender);
        let mut state = state.lock().await;

        if state.next == nonce + 1 {
            state.next = nonce;
            debug!("Released nonce {} for {:?}", nonce, sender);
        } else if nonce < state.next {
            state.next = 0;
            debug!("Nonce {} of {:?} left a gap, resyncing with chain", nonce, sender);
        }
    }

    /// Forget the local counter; the next allocation uses the on-chain count
    pub async fn reset(&self, sender: Address) {
        let state = self.state(sender);
        let mut state = state.lock().await;
        state.next = 0;
        debug!("Reset nonce counter for {:?}", sender);
    }

    /// Assign nonces to a batch, returned in request order.
    ///
    /// Each sender's nonces are consecutive in the order its requests appear.
    /// The on-chain count is queried at most once per sender, and only if some
    /// request of that sender needs a nonce before any explicit one sets the
    /// counter. Nothing is committed unless the whole batch is assigned.
    pub async fn sequence(&self, requests: &[NonceRequest]) -> DeployerResult<Vec<u64>> {
        let senders: BTreeSet<Address> = requests.iter().map(|r| r.sender).collect();

        // Sorted lock order keeps concurrent batches from deadlocking
        let mut guards: BTreeMap<Address, OwnedMutexGuard<SenderNonceState>> = BTreeMap::new();
        for sender in senders {
            let guard = self.state(sender).lock_owned().await;
            guards.insert(sender, guard);
        }

        let mut counters: BTreeMap<Address, u64> = BTreeMap::new();
        let mut assigned = Vec::with_capacity(requests.len());

        for request in requests {
            let local_next = guards.get(&request.sender).map(|g| g.next).unwrap_or(0);
            let counter = counters.get(&request.sender).copied();

            let next = counter.unwrap_or(local_next);

            let nonce = match (request.explicit, counter) {
                (Some(explicit), _) if explicit < next => {
                    return Err(DeployerError::Nonce {
                        address: format!("{:?}", request.sender),
                        message: format!(
                            "explicit nonce {} would collide, next available is {}",
                            explicit, next
                        ),
                    });
                }
                (Some(explicit), _) => explicit,
                (None, Some(counter)) => counter,
                (None, None) => self.fetch_nonce(request.sender).await?.max(local_next),
            };

            counters.insert(request.sender, nonce + 1);
            assigned.push(nonce);
        }

        for (sender, next) in counters {
            if let Some(guard) = guards.get_mut(&sender) {
                guard.next = guard.next.max(next);
            }
        }

        debug!("Sequenced {} nonces", assigned.len());
        Ok(assigned)
    }

    /// Fetch the pending transaction count from chain
    async fn fetch_nonce(&self, sender: Address) -> DeployerResult<u64> {
        let count = self
            .client
            .get_transaction_count(sender)
            .await
            .map_err(|e| DeployerError::Nonce {
                address: format!("{:?}", sender),
                message: e.to_string(),
            })?;

        u256_to_u64(count).ok_or_else(|| DeployerError::Nonce {
            address: format!("{:?}", sender),
            message: format!("transaction count {} out of range", count),
        })
    }
}

/// Narrow a `U256` nonce, `None` when it does not fit
pub(crate) fn u256_to_u64(value: U256) -> Option<u64> {
    if value.bits() > 64 {
        None
    } else {
        Some(value.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use mockall::predicate::eq;

    fn alice() -> Address {
        Address::repeat_byte(0xa)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb)
    }

    fn client_with_counts(counts: &[(Address, u64)], times: usize) -> MockChainClient {
        let mut client = MockChainClient::new();
        for (address, count) in counts.iter().copied() {
            client
                .expect_get_transaction_count()
                .with(eq(address))
                .times(times)
                .returning(move |_| Ok(U256::from(count)));
        }
        client
    }

    #[tokio::test]
    async fn test_batch_nonces_per_sender_regardless_of_interleaving() {
        let client = client_with_counts(&[(alice(), 5), (bob(), 9)], 1);
        let nonces = NonceManager::new(Arc::new(client));

        let requests = vec![
            NonceRequest::new(alice()),
            NonceRequest::new(bob()),
            NonceRequest::new(alice()),
            NonceRequest::new(bob()),
            NonceRequest::new(alice()),
        ];

        let assigned = nonces.sequence(&requests).await.unwrap();
        assert_eq!(assigned, vec![5, 9, 6, 10, 7]);
    }

    #[tokio::test]
    async fn test_explicit_first_nonce_skips_query() {
        let mut client = MockChainClient::new();
        client.expect_get_transaction_count().never();
        let nonces = NonceManager::new(Arc::new(client));

        let requests = vec![
            NonceRequest::with_nonce(alice(), 20),
            NonceRequest::new(alice()),
            NonceRequest::new(alice()),
        ];

        assert_eq!(nonces.sequence(&requests).await.unwrap(), vec![20, 21, 22]);
    }

    #[tokio::test]
    async fn test_explicit_nonce_collision_is_rejected() {
        let client = client_with_counts(&[(alice(), 5)], 1);
        let nonces = NonceManager::new(Arc::new(client));

        let requests = vec![
            NonceRequest::new(alice()),
            NonceRequest::with_nonce(alice(), 5),
        ];

        let err = nonces.sequence(&requests).await.unwrap_err();
        assert!(matches!(err, DeployerError::Nonce { .. }));
    }

    #[tokio::test]
    async fn test_failed_batch_commits_nothing() {
        let client = client_with_counts(&[(alice(), 5)], 2);
        let nonces = NonceManager::new(Arc::new(client));

        let bad = vec![
            NonceRequest::new(alice()),
            NonceRequest::new(alice()),
            NonceRequest::with_nonce(alice(), 3),
        ];
        assert!(nonces.sequence(&bad).await.is_err());

        let good = vec![NonceRequest::new(alice())];
        assert_eq!(nonces.sequence(&good).await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_sequential_batches_do_not_reuse_nonces() {
        // The node has not seen the first batch yet
        let client = client_with_counts(&[(alice(), 5)], 2);
        let nonces = NonceManager::new(Arc::new(client));

        let batch = vec![NonceRequest::new(alice()), NonceRequest::new(alice())];
        assert_eq!(nonces.sequence(&batch).await.unwrap(), vec![5, 6]);
        assert_eq!(nonces.sequence(&batch).await.unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_next_nonce_and_release() {
        let client = client_with_counts(&[(alice(), 3)], 3);
        let nonces = NonceManager::new(Arc::new(client));

        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 3);
        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 4);

        nonces.release_nonce(alice(), 4).await;
        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_releasing_older_nonce_resyncs_with_chain() {
        let client = client_with_counts(&[(alice(), 3)], 3);
        let nonces = NonceManager::new(Arc::new(client));

        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 3);
        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 4);

        // 3 never reached the node, so 4 cannot be mined either
        nonces.release_nonce(alice(), 3).await;
        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reset_falls_back_to_chain_count() {
        let client = client_with_counts(&[(alice(), 5)], 2);
        let nonces = NonceManager::new(Arc::new(client));

        let batch = vec![NonceRequest::new(alice()), NonceRequest::new(alice())];
        assert_eq!(nonces.sequence(&batch).await.unwrap(), vec![5, 6]);

        nonces.reset(alice()).await;
        assert_eq!(nonces.sequence(&batch).await.unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(u256_to_u64(U256::from(u64::MAX)), Some(u64::MAX));
        assert_eq!(u256_to_u64(U256::from(u64::MAX) + 1), None);
    }

    #[tokio::test]
    async fn test_observed_nonce_is_skipped() {
        let client = client_with_counts(&[(alice(), 0)], 1);
        let nonces = NonceManager::new(Arc::new(client));

        nonces.observe(alice(), 10).await;
        assert_eq!(nonces.next_nonce(alice()).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_query_failure_is_a_nonce_error() {
        let mut client = MockChainClient::new();
        client
            .expect_get_transaction_count()
            .returning(|_| Err(DeployerError::ChainConnection("refused".into())));
        let nonces = NonceManager::new(Arc::new(client));

        let err = nonces.next_nonce(alice()).await.unwrap_err();
        assert!(matches!(err, DeployerError::Nonce { .. }));
    }
}
