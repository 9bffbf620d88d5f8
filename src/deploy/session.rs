//! Deployment session
//!
//! Owns every collaborator a deployment needs and exposes the deploy,
//! execute, batch, raw-transaction and read operations on top of them.

use super::diff::DeploymentDiffer;
use super::types::{
    encode_creation_data, BatchOptions, CallOptions, DeployOptions, DeployResult, DeployStage,
    ExecuteRequest, ManualAction, RawTxRequest, TxOptions,
};
use crate::artifacts::{link_libraries, ArtifactSource};
use crate::chain::{ChainClient, ChainProvider, PollPolicy, ReceiptWaiter};
use crate::config::Settings;
use crate::error::{DeployerError, DeployerResult};
use crate::metrics;
use crate::state::{Deployment, DeploymentStore, PendingDeployment};
use crate::tx::{
    FixedGasPrice, GasEstimator, GasPriceOracle, NodeGasPrice, NonceManager, NonceRequest,
    NoopHook, PendingTx, PendingTxHook, SignerHandle, SignerResolver, TransactionSender,
};

use ethers::abi::{Function, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionReceipt, TransactionRequest};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deployment orchestration against one chain
pub struct DeploymentSession {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn DeploymentStore>,
    chain_id: u64,
    artifacts: Arc<dyn ArtifactSource>,
    signers: SignerResolver,
    gas: GasEstimator,
    nonces: NonceManager,
    sender: TransactionSender,
    receipts: ReceiptWaiter,
    differ: DeploymentDiffer,
    /// Force-mine after every submission
    dev_force_mine: bool,
}

impl DeploymentSession {
    /// Create a session; the chain id is fetched once here
    pub async fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn DeploymentStore>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> DeployerResult<Self> {
        let chain_id = client.chain_id().await?;
        info!("Deployment session on chain {}", chain_id);

        Ok(Self {
            signers: SignerResolver::new(client.clone(), chain_id),
            gas: GasEstimator::new(Arc::new(NodeGasPrice::new(client.clone()))),
            nonces: NonceManager::new(client.clone()),
            sender: TransactionSender::new(client.clone(), Arc::new(NoopHook)),
            receipts: ReceiptWaiter::new(client.clone(), PollPolicy::default()),
            differ: DeploymentDiffer::new(client.clone(), store.clone(), artifacts.clone()),
            client,
            store,
            chain_id,
            artifacts,
            dev_force_mine: false,
        })
    }

    /// Create a session for the network described by `settings`
    pub async fn connect(
        settings: &Settings,
        store: Arc<dyn DeploymentStore>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> DeployerResult<Self> {
        settings
            .validate()
            .map_err(|e| DeployerError::Config(e.to_string()))?;
        let provider = ChainProvider::new(settings.network.clone())?;
        let client: Arc<dyn ChainClient> = Arc::new(provider);

        let mut session = Self::new(client, store, artifacts)
            .await?
            .with_poll_policy(settings.deployer.poll_policy())
            .with_dev_force_mine(settings.deployer.dev_force_mine && !settings.network.is_live());

        if let Some(price) = settings.gas.gas_price_wei {
            session = session.with_gas_oracle(Arc::new(FixedGasPrice(price.into())));
        }

        Ok(session)
    }

    pub fn with_gas_oracle(mut self, oracle: Arc<dyn GasPriceOracle>) -> Self {
        self.gas = GasEstimator::new(oracle);
        self
    }

    pub fn with_pending_hook(mut self, hook: Arc<dyn PendingTxHook>) -> Self {
        self.sender = TransactionSender::new(self.client.clone(), hook);
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.receipts = ReceiptWaiter::new(self.client.clone(), policy);
        self
    }

    pub fn with_dev_force_mine(mut self, enabled: bool) -> Self {
        self.dev_force_mine = enabled;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Whether deploying `name` with `options` would change anything
    pub async fn fetch_if_different(
        &self,
        name: &str,
        options: &DeployOptions,
    ) -> DeployerResult<bool> {
        self.differ.is_different(name, options).await
    }

    /// Deploy `name` unless an identical deployment is already recorded
    pub async fn deploy(&self, name: &str, options: DeployOptions) -> DeployerResult<DeployResult> {
        let mut stage = DeployStage::NotStarted;
        let result = self.run_deploy(name, &options, &mut stage).await;

        if let Err(e) = &result {
            warn!("Deployment of \"{}\" failed while {}: {}", name, stage, e);
            advance(name, &mut stage, DeployStage::Failed);
            metrics::record_deploy_failed();
        }
        result
    }

    async fn run_deploy(
        &self,
        name: &str,
        options: &DeployOptions,
        stage: &mut DeployStage,
    ) -> DeployerResult<DeployResult> {
        advance(name, stage, DeployStage::Diffing);
        let different = match options.fields_to_compare {
            Some(_) => self.differ.is_different(name, options).await?,
            None => true,
        };

        if !different {
            advance(name, stage, DeployStage::Skipped);
            let deployment = self.store.get(name).await?;
            if options.log {
                info!("reusing \"{}\" at {:?}", name, deployment.address);
            } else {
                debug!("reusing \"{}\" at {:?}", name, deployment.address);
            }
            metrics::record_reused();
            return Ok(DeployResult {
                deployment,
                newly_deployed: false,
            });
        }

        advance(name, stage, DeployStage::Deploying);
        let signer = self.signers.resolve(&options.tx.from).await?;
        let artifact = self
            .artifacts
            .get_artifact(options.artifact_name(name))
            .await?;
        let bytecode = link_libraries(&artifact, &options.libraries)?;
        let data = encode_creation_data(&artifact.abi, &bytecode, &options.args)?;

        let mut tx: TypedTransaction = TransactionRequest::new().data(data).into();
        let allocated = self.prepare(&mut tx, signer.address(), &options.tx).await?;

        let pending_deployment = PendingDeployment {
            abi: artifact.abi,
            args: options.args.clone(),
            bytecode,
            deployed_bytecode: artifact.deployed_bytecode,
            libraries: options.libraries.clone(),
            linked_data: options.linked_data.clone(),
        };

        let pending = self
            .broadcast(
                &signer,
                tx,
                allocated,
                Some(name),
                Some(&pending_deployment),
                "deploy",
            )
            .await?;
        advance(name, stage, DeployStage::Submitted);
        debug!("Deploying \"{}\" in {:?}", name, pending.hash);

        if self.should_force_mine(options.tx.dev_force_mine) {
            self.sender.force_mine().await;
        }

        let receipt = self.receipts.wait_for_receipt(pending.hash, true).await?;
        advance(name, stage, DeployStage::Confirmed);

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployerError::ContractNotDeployed {
                tx_hash: format!("{:?}", pending.hash),
            })?;
        let gas_used = receipt.gas_used.unwrap_or_default();

        let deployment = pending_deployment.confirm(address, receipt);
        self.store.save(name, deployment.clone()).await?;
        advance(name, stage, DeployStage::Persisted);

        if options.log {
            info!("\"{}\" deployed at {:?} with {} gas", name, address, gas_used);
        } else {
            debug!("\"{}\" deployed at {:?} with {} gas", name, address, gas_used);
        }
        metrics::record_deployed();

        Ok(DeployResult {
            deployment,
            newly_deployed: true,
        })
    }

    /// Call a state-changing method of a deployed contract and wait for it.
    ///
    /// `Ok(None)` means the sender could not be signed for and the transaction
    /// was surfaced for manual signing instead.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        let tx = self.build_execute(&request).await?;
        let signer = match self.signers.resolve_optional(&request.options.from).await? {
            Some(signer) => signer,
            None => {
                let call = (request.method.as_str(), request.args.as_slice());
                return self
                    .manual_action(&tx, &request.options, Some(call))
                    .map(|_| None);
            }
        };

        self.send_and_wait(&signer, tx, &request.options, "execute")
            .await
            .map(Some)
    }

    /// Send an arbitrary transaction and wait for it
    pub async fn raw_tx(&self, request: RawTxRequest) -> DeployerResult<Option<TransactionReceipt>> {
        let mut builder = TransactionRequest::new().to(request.to);
        if let Some(data) = request.data {
            builder = builder.data(data);
        }
        let tx: TypedTransaction = builder.into();

        let signer = match self.signers.resolve_optional(&request.options.from).await? {
            Some(signer) => signer,
            None => {
                return self
                    .manual_action(&tx, &request.options, None)
                    .map(|_| None)
            }
        };

        self.send_and_wait(&signer, tx, &request.options, "raw")
            .await
            .map(Some)
    }

    /// Execute several calls with nonces assigned up front.
    ///
    /// Fees are settled before any nonce is taken, so an intent failing there
    /// holds no nonce. Results are in request order. A failing intent does not
    /// stop the others; only a nonce assignment failure fails the whole batch.
    pub async fn batch_execute(
        &self,
        requests: Vec<ExecuteRequest>,
        options: BatchOptions,
    ) -> DeployerResult<Vec<DeployerResult<Option<TransactionReceipt>>>> {
        let batch_id = Uuid::new_v4();
        info!("Batch {}: {} transactions", batch_id, requests.len());

        let mut results: Vec<Option<DeployerResult<Option<TransactionReceipt>>>> =
            requests.iter().map(|_| None).collect();
        let mut ready: Vec<(usize, SignerHandle, TypedTransaction)> = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let mut tx = match self.build_execute(request).await {
                Ok(tx) => tx,
                Err(e) => {
                    results[index] = Some(Err(e));
                    continue;
                }
            };

            match self.signers.resolve_optional(&request.options.from).await {
                Ok(Some(signer)) => {
                    match self
                        .prepare_fees(&mut tx, signer.address(), &request.options)
                        .await
                    {
                        Ok(()) => ready.push((index, signer, tx)),
                        Err(e) => results[index] = Some(Err(e)),
                    }
                }
                Ok(None) => {
                    let call = (request.method.as_str(), request.args.as_slice());
                    let outcome = self
                        .manual_action(&tx, &request.options, Some(call))
                        .map(|_| None);
                    results[index] = Some(outcome);
                }
                Err(e) => results[index] = Some(Err(e)),
            }
        }

        let nonce_requests: Vec<NonceRequest> = ready
            .iter()
            .map(|(index, signer, _)| NonceRequest {
                sender: signer.address(),
                explicit: requests[*index].options.nonce,
            })
            .collect();
        let nonces = self.nonces.sequence(&nonce_requests).await?;
        debug!("Batch {}: nonces {:?}", batch_id, nonces);

        let submissions = ready
            .into_iter()
            .zip(nonces)
            .map(|((index, signer, mut tx), nonce)| async move {
                tx.set_nonce(nonce);
                let result = self.sender.submit(&signer, tx, None, None, "batch").await;
                (index, signer.address(), result)
            });
        let submitted = join_all(submissions).await;

        // A nonce that never reached the node leaves a gap for its sender
        let stalled: BTreeSet<Address> = submitted
            .iter()
            .filter(|(_, _, result)| result.is_err())
            .map(|(_, sender, _)| *sender)
            .collect();
        for sender in stalled {
            self.nonces.reset(sender).await;
        }

        let any_sent = submitted.iter().any(|(_, _, result)| result.is_ok());
        if any_sent && self.should_force_mine(options.dev_force_mine) {
            self.sender.force_mine().await;
        }

        let confirmations = submitted.into_iter().map(|(index, _, result)| async move {
            let outcome = match result {
                Ok(pending) => self
                    .receipts
                    .wait_for_receipt(pending.hash, false)
                    .await
                    .map(Some),
                Err(e) => Err(e),
            };
            (index, outcome)
        });
        for (index, outcome) in join_all(confirmations).await {
            results[index] = Some(outcome);
        }

        let failed = results
            .iter()
            .filter(|r| matches!(r, Some(Err(_))))
            .count();
        info!("Batch {} done, {} failed", batch_id, failed);

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    Err(DeployerError::Internal("batch intent left without a result".to_string()))
                })
            })
            .collect())
    }

    /// Call a view method against the latest state; never submits
    pub async fn read(
        &self,
        name: &str,
        options: &CallOptions,
        method: &str,
        args: &[Token],
    ) -> DeployerResult<Vec<Token>> {
        let deployment = self.store.get(name).await?;
        let function = find_method(&deployment, name, method)?;
        let data = function.encode_input(args)?;

        let mut call = TransactionRequest::new().to(deployment.address).data(data);
        if let Some(from) = &options.from {
            call = call.from(SignerResolver::address_of(from)?);
        }
        if let Some(gas) = options.gas_limit {
            call = call.gas(gas);
        }
        if let Some(price) = options.gas_price {
            call = call.gas_price(price);
        }
        if let Some(value) = options.value {
            call = call.value(value);
        }

        let output = self.client.call(&call.into()).await?;
        Ok(function.decode_output(&output)?)
    }

    async fn build_execute(&self, request: &ExecuteRequest) -> DeployerResult<TypedTransaction> {
        let deployment = self.store.get(&request.name).await?;
        let function = find_method(&deployment, &request.name, &request.method)?;
        let data = function.encode_input(&request.args)?;
        Ok(TransactionRequest::new()
            .to(deployment.address)
            .data(data)
            .into())
    }

    /// Apply caller overrides, then fill gas limit, gas price and nonce.
    ///
    /// Returns the nonce when it was allocated by the session.
    async fn prepare(
        &self,
        tx: &mut TypedTransaction,
        from: Address,
        options: &TxOptions,
    ) -> DeployerResult<Option<u64>> {
        self.prepare_fees(tx, from, options).await?;

        match options.nonce {
            Some(nonce) => {
                self.nonces.observe(from, nonce).await;
                tx.set_nonce(nonce);
                Ok(None)
            }
            None => {
                let nonce = self.nonces.next_nonce(from).await?;
                tx.set_nonce(nonce);
                Ok(Some(nonce))
            }
        }
    }

    async fn prepare_fees(
        &self,
        tx: &mut TypedTransaction,
        from: Address,
        options: &TxOptions,
    ) -> DeployerResult<()> {
        tx.set_from(from);
        if let Some(value) = options.value {
            tx.set_value(value);
        }
        if let Some(gas) = options.gas_limit {
            tx.set_gas(gas);
        }
        if let Some(price) = options.gas_price {
            tx.set_gas_price(price);
        }

        let client = self.client.clone();
        self.gas
            .set_gas_limit(
                tx,
                move |candidate| async move {
                    client
                        .estimate_gas(&candidate)
                        .await
                        .map_err(|e| DeployerError::GasEstimation(e.to_string()))
                },
                options.estimated_gas_limit,
                options.estimate_gas_extra,
            )
            .await?;
        self.gas.set_gas_price(tx).await?;

        if let (Some(gas), Some(price)) = (tx.gas(), tx.gas_price()) {
            debug!(
                "Transaction from {:?} costs at most {} wei",
                from,
                GasEstimator::calculate_cost(*gas, price)
            );
        }
        Ok(())
    }

    /// Submit, giving the nonce back when the broadcast fails
    async fn broadcast(
        &self,
        signer: &SignerHandle,
        tx: TypedTransaction,
        allocated: Option<u64>,
        name: Option<&str>,
        deployment: Option<&PendingDeployment>,
        kind: &'static str,
    ) -> DeployerResult<PendingTx> {
        match self.sender.submit(signer, tx, name, deployment, kind).await {
            Ok(pending) => Ok(pending),
            Err(e) => {
                if let Some(nonce) = allocated {
                    self.nonces.release_nonce(signer.address(), nonce).await;
                }
                Err(e)
            }
        }
    }

    async fn send_and_wait(
        &self,
        signer: &SignerHandle,
        mut tx: TypedTransaction,
        options: &TxOptions,
        kind: &'static str,
    ) -> DeployerResult<TransactionReceipt> {
        let allocated = self.prepare(&mut tx, signer.address(), options).await?;
        let pending = self
            .broadcast(signer, tx, allocated, None, None, kind)
            .await?;

        if self.should_force_mine(options.dev_force_mine) {
            self.sender.force_mine().await;
        }

        self.receipts.wait_for_receipt(pending.hash, false).await
    }

    /// Describe a transaction nobody here can sign, then skip or abort
    fn manual_action(
        &self,
        tx: &TypedTransaction,
        options: &TxOptions,
        call: Option<(&str, &[Token])>,
    ) -> DeployerResult<()> {
        let action = ManualAction {
            from: options.from.clone(),
            to: tx.to_addr().copied(),
            value: options.value,
            data: tx.data().cloned().unwrap_or_default(),
            method: call.map(|(method, _)| method.to_string()),
            args: call.map(|(_, args)| args.iter().map(ToString::to_string).collect()),
        };
        let description = serde_json::to_string_pretty(&action)
            .map_err(|e| DeployerError::Internal(e.to_string()))?;

        metrics::record_manual_action(options.skip_unknown_signer);
        if options.skip_unknown_signer {
            warn!(
                "Skipping transaction, execute it manually as {}:\n{}",
                options.from, description
            );
            Ok(())
        } else {
            warn!("ABORT, ACTION REQUIRED as {}:\n{}", options.from, description);
            Err(DeployerError::AbortRequiresManualAction {
                from: options.from.clone(),
                description,
            })
        }
    }

    fn should_force_mine(&self, requested: bool) -> bool {
        requested || self.dev_force_mine
    }
}

fn find_method<'a>(
    deployment: &'a Deployment,
    name: &str,
    method: &str,
) -> DeployerResult<&'a Function> {
    deployment
        .abi
        .function(method)
        .map_err(|_| DeployerError::NoMethod {
            name: name.to_string(),
            method: method.to_string(),
        })
}

fn advance(name: &str, stage: &mut DeployStage, next: DeployStage) {
    debug!("\"{}\": {} -> {}", name, stage, next);
    *stage = next;
}
