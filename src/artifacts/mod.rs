//! Compiled contract artifacts
//!
//! Artifacts are produced by an external compiler; the deployer only reads
//! them. The JSON layout follows the Hardhat/Buidler artifact format.

pub mod linker;

pub use linker::{link_bytecode, link_libraries, placeholder_tag};

use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::Abi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Byte range in creation code where a library address goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// Source file -> library name -> ranges
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>;

/// Compiler output for one contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub contract_name: Option<String>,
    pub abi: Abi,
    /// Creation code template, possibly containing library placeholders
    pub bytecode: String,
    #[serde(default)]
    pub deployed_bytecode: String,
    #[serde(default)]
    pub link_references: Option<LinkReferences>,
}

impl Artifact {
    /// Parse an artifact from its JSON representation
    pub fn from_json(json: &str) -> DeployerResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DeployerError::Internal(format!("Invalid artifact JSON: {}", e)))
    }
}

/// Supplies artifacts by contract name
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn get_artifact(&self, name: &str) -> DeployerResult<Artifact>;
}

/// In-memory artifact source
#[derive(Default)]
pub struct ArtifactRegistry {
    artifacts: DashMap<String, Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an artifact under `name`
    pub fn insert(&self, name: impl Into<String>, artifact: Artifact) {
        self.artifacts.insert(name.into(), artifact);
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactSource for ArtifactRegistry {
    async fn get_artifact(&self, name: &str) -> DeployerResult<Artifact> {
        self.artifacts
            .get(name)
            .map(|a| a.clone())
            .ok_or_else(|| DeployerError::ArtifactNotFound {
                name: name.to_string(),
            })
    }
}
