//! Deployment store

use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, TransactionReceipt};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Everything known about a deployment before its transaction is mined
#[derive(Debug, Clone)]
pub struct PendingDeployment {
    pub abi: Abi,
    /// Constructor arguments
    pub args: Vec<Token>,
    /// Linked creation code (without constructor arguments)
    pub bytecode: Bytes,
    pub deployed_bytecode: String,
    pub libraries: BTreeMap<String, Address>,
    /// Opaque caller metadata kept alongside the record
    pub linked_data: Option<serde_json::Value>,
}

/// A confirmed deployment
#[derive(Debug, Clone)]
pub struct Deployment {
    pub abi: Abi,
    pub address: Address,
    pub receipt: TransactionReceipt,
    pub args: Vec<Token>,
    pub bytecode: Bytes,
    pub deployed_bytecode: String,
    pub libraries: BTreeMap<String, Address>,
    pub linked_data: Option<serde_json::Value>,
    pub deployed_at: DateTime<Utc>,
}

impl PendingDeployment {
    /// Complete the record once the creation receipt is known
    pub fn confirm(self, address: Address, receipt: TransactionReceipt) -> Deployment {
        Deployment {
            abi: self.abi,
            address,
            receipt,
            args: self.args,
            bytecode: self.bytecode,
            deployed_bytecode: self.deployed_bytecode,
            libraries: self.libraries,
            linked_data: self.linked_data,
            deployed_at: Utc::now(),
        }
    }
}

/// External persistence for deployment records, keyed by deployment name
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Save (or replace) the record for `name`
    async fn save(&self, name: &str, deployment: Deployment) -> DeployerResult<()>;

    /// Record for `name`, if any
    async fn get_or_null(&self, name: &str) -> DeployerResult<Option<Deployment>>;

    /// Record for `name`, failing when absent
    async fn get(&self, name: &str) -> DeployerResult<Deployment> {
        self.get_or_null(name)
            .await?
            .ok_or_else(|| DeployerError::DeploymentNotFound {
                name: name.to_string(),
            })
    }

    /// All records
    async fn all(&self) -> DeployerResult<BTreeMap<String, Deployment>>;
}

/// In-memory deployment store
#[derive(Default)]
pub struct MemoryStore {
    deployments: RwLock<BTreeMap<String, Deployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn save(&self, name: &str, deployment: Deployment) -> DeployerResult<()> {
        debug!("Saving deployment {} at {:?}", name, deployment.address);
        self.deployments
            .write()
            .await
            .insert(name.to_string(), deployment);
        Ok(())
    }

    async fn get_or_null(&self, name: &str) -> DeployerResult<Option<Deployment>> {
        Ok(self.deployments.read().await.get(name).cloned())
    }

    async fn all(&self) -> DeployerResult<BTreeMap<String, Deployment>> {
        Ok(self.deployments.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingDeployment {
        PendingDeployment {
            abi: Abi::default(),
            args: vec![Token::Uint(42u64.into())],
            bytecode: Bytes::from(vec![0x60, 0x80]),
            deployed_bytecode: "0x6080".to_string(),
            libraries: BTreeMap::new(),
            linked_data: Some(serde_json::json!({"version": 1})),
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = MemoryStore::new();
        assert!(store.get_or_null("Token").await.unwrap().is_none());
        assert!(matches!(
            store.get("Token").await,
            Err(DeployerError::DeploymentNotFound { .. })
        ));

        let deployment = pending().confirm(Address::repeat_byte(1), TransactionReceipt::default());
        store.save("Token", deployment).await.unwrap();

        let saved = store.get("Token").await.unwrap();
        assert_eq!(saved.address, Address::repeat_byte(1));
        assert_eq!(saved.args, vec![Token::Uint(42u64.into())]);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redeploy_replaces_record() {
        let store = MemoryStore::new();
        store
            .save("Token", pending().confirm(Address::repeat_byte(1), Default::default()))
            .await
            .unwrap();
        store
            .save("Token", pending().confirm(Address::repeat_byte(2), Default::default()))
            .await
            .unwrap();

        assert_eq!(store.get("Token").await.unwrap().address, Address::repeat_byte(2));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
