//! Redeploy detection
//!
//! A deployment is reused only when the transaction that would deploy it now
//! matches the recorded deployment transaction on every compared field.

use super::types::{encode_creation_data, DeployOptions, TxField};
use crate::artifacts::{link_libraries, ArtifactSource};
use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};
use crate::state::DeploymentStore;
use crate::tx::SignerResolver;

use ethers::types::{Bytes, Transaction, U256};
use std::sync::Arc;
use tracing::debug;

/// Value of one transaction field, as far as comparison is concerned
#[derive(Debug, PartialEq, Eq)]
enum FieldValue {
    Bytes(Bytes),
    Number(U256),
}

/// Decides whether a named deployment has to be (re)deployed
pub struct DeploymentDiffer {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn DeploymentStore>,
    artifacts: Arc<dyn ArtifactSource>,
}

impl DeploymentDiffer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn DeploymentStore>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            client,
            store,
            artifacts,
        }
    }

    /// Whether deploying `name` with `options` would differ from what is recorded
    pub async fn is_different(&self, name: &str, options: &DeployOptions) -> DeployerResult<bool> {
        let Some(deployment) = self.store.get_or_null(name).await? else {
            debug!("No previous deployment of {}", name);
            return Ok(true);
        };

        let tx_hash = deployment.receipt.transaction_hash;
        let Some(stored) = self.client.get_transaction(tx_hash).await? else {
            debug!("Deployment transaction {:?} of {} not found", tx_hash, name);
            return Ok(true);
        };

        if stored.block_number.is_none() {
            debug!("Deployment transaction {:?} of {} is still pending", tx_hash, name);
        }

        let fields = options
            .fields_to_compare
            .clone()
            .unwrap_or_else(|| vec![TxField::Data]);

        for field in fields {
            let rebuilt = self
                .rebuilt_field(name, options, field)
                .await?
                .ok_or_else(|| DeployerError::FieldComparison {
                    field: field.to_string(),
                })?;

            if rebuilt != stored_field(&stored, field) {
                debug!("Field {} of {} changed", field, name);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Value `field` would take in a fresh deployment transaction
    async fn rebuilt_field(
        &self,
        name: &str,
        options: &DeployOptions,
        field: TxField,
    ) -> DeployerResult<Option<FieldValue>> {
        let value = match field {
            TxField::Data => {
                let artifact = self
                    .artifacts
                    .get_artifact(options.artifact_name(name))
                    .await?;
                let bytecode = link_libraries(&artifact, &options.libraries)?;
                let data = encode_creation_data(&artifact.abi, &bytecode, &options.args)?;
                Some(FieldValue::Bytes(data))
            }
            TxField::GasLimit => options.tx.gas_limit.map(FieldValue::Number),
            TxField::GasPrice => options.tx.gas_price.map(FieldValue::Number),
            TxField::Value => options.tx.value.map(FieldValue::Number),
            TxField::From => {
                let from = SignerResolver::address_of(&options.tx.from)?;
                Some(FieldValue::Bytes(Bytes::from(from.as_bytes().to_vec())))
            }
        };
        Ok(value)
    }
}

fn stored_field(tx: &Transaction, field: TxField) -> FieldValue {
    match field {
        TxField::Data => FieldValue::Bytes(tx.input.clone()),
        TxField::GasLimit => FieldValue::Number(tx.gas),
        TxField::GasPrice => FieldValue::Number(tx.gas_price.unwrap_or_default()),
        TxField::Value => FieldValue::Number(tx.value),
        TxField::From => FieldValue::Bytes(Bytes::from(tx.from.as_bytes().to_vec())),
    }
}
