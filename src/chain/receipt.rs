//! Receipt polling for submitted transactions
//!
//! A transaction counts as confirmed once its receipt carries a block number.
//! Contract-creation receipts must additionally carry the created address.

use super::ChainClient;
use crate::error::{DeployerError, DeployerResult};
use crate::metrics;

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

/// How often, and for how long, to poll for a receipt
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll
    pub interval: Duration,
    /// Growth factor applied to the delay after each empty poll (1.0 = fixed)
    pub backoff_multiplier: f64,
    /// Upper bound for the delay
    pub max_interval: Duration,
    /// Give up after this long; `None` polls forever
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

impl PollPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        let ceiling = self.max_interval.max(self.interval);
        current.mul_f64(self.backoff_multiplier.max(1.0)).min(ceiling)
    }
}

/// Waits for transactions to be mined
pub struct ReceiptWaiter {
    client: Arc<dyn ChainClient>,
    policy: PollPolicy,
}

impl ReceiptWaiter {
    pub fn new(client: Arc<dyn ChainClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll until the receipt for `tx_hash` is available.
    ///
    /// Read errors are treated as transient and retried. Dropping the returned
    /// future stops polling; a configured deadline turns into
    /// [`DeployerError::Timeout`].
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        is_contract_creation: bool,
    ) -> DeployerResult<TransactionReceipt> {
        let result = match self.policy.deadline {
            Some(deadline) => timeout(deadline, self.poll(tx_hash, is_contract_creation))
                .await
                .unwrap_or_else(|_| {
                    Err(DeployerError::Timeout {
                        operation: format!("receipt of {:?}", tx_hash),
                    })
                }),
            None => self.poll(tx_hash, is_contract_creation).await,
        };

        if let Err(e) = &result {
            metrics::record_tx_failed("confirm");
            debug!("Confirmation of {:?} failed: {}", tx_hash, e);
        }
        result
    }

    async fn poll(
        &self,
        tx_hash: H256,
        is_contract_creation: bool,
    ) -> DeployerResult<TransactionReceipt> {
        let started = Instant::now();
        let mut delay = self.policy.interval;
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            metrics::record_receipt_poll();

            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => {
                    if is_contract_creation && receipt.contract_address.is_none() {
                        return Err(DeployerError::ContractNotDeployed {
                            tx_hash: format!("{:?}", tx_hash),
                        });
                    }

                    metrics::record_receipt_latency(started.elapsed().as_secs_f64());
                    debug!(
                        "Receipt for {:?} found in block {:?} after {} polls",
                        tx_hash, receipt.block_number, attempts
                    );
                    return Ok(receipt);
                }
                Ok(_) => trace!("No receipt yet for {:?}", tx_hash),
                Err(e) => debug!("Transient error polling receipt for {:?}: {}", tx_hash, e),
            }

            sleep(delay).await;
            delay = self.policy.next_interval(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn mined_receipt(tx_hash: H256, contract_address: Option<Address>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(7u64.into()),
            contract_address,
            ..Default::default()
        }
    }

    fn confirm_failures() -> f64 {
        metrics::TX_FAILED.with_label_values(&["confirm"]).get()
    }

    /// Answers `None` for the first `empty_polls` calls, then the receipt
    fn client_with_receipt_after(
        empty_polls: usize,
        receipt: TransactionReceipt,
    ) -> (MockChainClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockChainClient::new();
        client
            .expect_get_transaction_receipt()
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) < empty_polls {
                    Ok(None)
                } else {
                    Ok(Some(receipt.clone()))
                }
            });
        (client, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_only_after_two_intervals() {
        let tx_hash = H256::repeat_byte(1);
        let (client, calls) = client_with_receipt_after(2, mined_receipt(tx_hash, None));
        let waiter = ReceiptWaiter::new(Arc::new(client), PollPolicy::default());

        let started = Instant::now();
        let receipt = assert_ok!(waiter.wait_for_receipt(tx_hash, false).await);

        assert_eq!(receipt.transaction_hash, tx_hash);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_pending_before_first_interval() {
        let tx_hash = H256::repeat_byte(2);
        let (client, _) = client_with_receipt_after(1, mined_receipt(tx_hash, None));
        let waiter = ReceiptWaiter::new(Arc::new(client), PollPolicy::default());

        let mut fut = tokio_test::task::spawn(waiter.wait_for_receipt(tx_hash, false));
        tokio_test::assert_pending!(fut.poll());

        tokio::time::advance(Duration::from_secs(2)).await;
        let receipt = tokio_test::assert_ready_ok!(fut.poll());
        assert_eq!(receipt.block_number, Some(7u64.into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_swallows_transient_errors() {
        let tx_hash = H256::repeat_byte(3);
        let receipt = mined_receipt(tx_hash, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockChainClient::new();
        client.expect_get_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DeployerError::ChainConnection("connection reset".into()))
            } else {
                Ok(Some(receipt.clone()))
            }
        });

        let waiter = ReceiptWaiter::new(Arc::new(client), PollPolicy::default());
        assert_ok!(waiter.wait_for_receipt(tx_hash, false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_receipts_without_block_number() {
        let tx_hash = H256::repeat_byte(4);
        let unmined = TransactionReceipt {
            transaction_hash: tx_hash,
            ..Default::default()
        };
        let mined = mined_receipt(tx_hash, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockChainClient::new();
        client.expect_get_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(unmined.clone()))
            } else {
                Ok(Some(mined.clone()))
            }
        });

        let waiter = ReceiptWaiter::new(Arc::new(client), PollPolicy::default());
        let receipt = assert_ok!(waiter.wait_for_receipt(tx_hash, false).await);
        assert!(receipt.block_number.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_receipt_without_address_fails() {
        let tx_hash = H256::repeat_byte(5);
        let (client, _) = client_with_receipt_after(0, mined_receipt(tx_hash, None));
        let waiter = ReceiptWaiter::new(Arc::new(client), PollPolicy::default());

        let failed_before = confirm_failures();
        let err = assert_err!(waiter.wait_for_receipt(tx_hash, true).await);
        assert!(matches!(err, DeployerError::ContractNotDeployed { .. }));
        assert!(confirm_failures() > failed_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let mut client = MockChainClient::new();
        client.expect_get_transaction_receipt().returning(|_| Ok(None));
        let policy = PollPolicy {
            deadline: Some(Duration::from_secs(5)),
            ..PollPolicy::default()
        };
        let waiter = ReceiptWaiter::new(Arc::new(client), policy);

        let failed_before = confirm_failures();
        let err = assert_err!(waiter.wait_for_receipt(H256::zero(), false).await);
        assert!(matches!(err, DeployerError::Timeout { .. }));
        assert!(confirm_failures() > failed_before);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = PollPolicy {
            interval: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(5),
            deadline: None,
        };
        assert_eq!(policy.next_interval(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(policy.next_interval(Duration::from_secs(4)), Duration::from_secs(5));
        assert_eq!(
            PollPolicy::default().next_interval(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }
}
