//! Request and result types for deployment operations

use crate::error::DeployerResult;
use crate::state::Deployment;

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, U256};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Transaction field compared when deciding whether to redeploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxField {
    Data,
    GasLimit,
    GasPrice,
    Value,
    From,
}

impl fmt::Display for TxField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxField::Data => "data",
            TxField::GasLimit => "gasLimit",
            TxField::GasPrice => "gasPrice",
            TxField::Value => "value",
            TxField::From => "from",
        };
        write!(f, "{}", name)
    }
}

/// Options shared by every submitted transaction
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    /// Sender: an address managed by the node or a raw private key
    pub from: String,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    /// Ceiling for gas estimation
    pub estimated_gas_limit: Option<U256>,
    /// Added to the gas estimate (clamped to `estimated_gas_limit`)
    pub estimate_gas_extra: Option<U256>,
    /// Issue `evm_mine` right after submission
    pub dev_force_mine: bool,
    /// Surface the transaction for manual signing instead of failing
    pub skip_unknown_signer: bool,
}

impl TxOptions {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }

    pub fn gas_price(mut self, gas_price: impl Into<U256>) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn estimate_gas_extra(mut self, extra: impl Into<U256>, ceiling: Option<U256>) -> Self {
        self.estimate_gas_extra = Some(extra.into());
        self.estimated_gas_limit = ceiling;
        self
    }

    pub fn dev_force_mine(mut self) -> Self {
        self.dev_force_mine = true;
        self
    }

    pub fn skip_unknown_signer(mut self) -> Self {
        self.skip_unknown_signer = true;
        self
    }
}

/// What to deploy under a name
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub tx: TxOptions,
    /// Artifact to deploy; defaults to the deployment name
    pub contract_name: Option<String>,
    /// Constructor arguments
    pub args: Vec<Token>,
    pub libraries: BTreeMap<String, Address>,
    /// Fields compared against the previous deployment; `None` always deploys
    pub fields_to_compare: Option<Vec<TxField>>,
    /// Opaque metadata stored with the record
    pub linked_data: Option<serde_json::Value>,
    /// Report the outcome at info level
    pub log: bool,
}

impl DeployOptions {
    pub fn new(from: impl Into<String>) -> Self {
        Self::from_tx(TxOptions::new(from))
    }

    pub fn from_tx(tx: TxOptions) -> Self {
        Self {
            tx,
            contract_name: None,
            args: Vec::new(),
            libraries: BTreeMap::new(),
            fields_to_compare: Some(vec![TxField::Data]),
            linked_data: None,
            log: false,
        }
    }

    pub fn contract(mut self, contract_name: impl Into<String>) -> Self {
        self.contract_name = Some(contract_name.into());
        self
    }

    pub fn args(mut self, args: Vec<Token>) -> Self {
        self.args = args;
        self
    }

    pub fn library(mut self, name: impl Into<String>, address: Address) -> Self {
        self.libraries.insert(name.into(), address);
        self
    }

    pub fn compare(mut self, fields: Vec<TxField>) -> Self {
        self.fields_to_compare = Some(fields);
        self
    }

    pub fn always_deploy(mut self) -> Self {
        self.fields_to_compare = None;
        self
    }

    pub fn linked_data(mut self, data: serde_json::Value) -> Self {
        self.linked_data = Some(data);
        self
    }

    pub fn log(mut self) -> Self {
        self.log = true;
        self
    }

    /// Name of the artifact backing deployment `name`
    pub fn artifact_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.contract_name.as_deref().unwrap_or(name)
    }
}

/// Call a method of a deployed contract
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Deployment name
    pub name: String,
    pub method: String,
    pub args: Vec<Token>,
    pub options: TxOptions,
}

impl ExecuteRequest {
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Token>,
        options: TxOptions,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            args,
            options,
        }
    }
}

/// Arbitrary transaction
#[derive(Debug, Clone)]
pub struct RawTxRequest {
    pub to: Address,
    pub data: Option<Bytes>,
    pub options: TxOptions,
}

/// Options for `eth_call`
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub from: Option<String>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
}

/// Options for a batch of executes
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Issue one `evm_mine` once every transaction is submitted
    pub dev_force_mine: bool,
}

/// Outcome of a deploy call
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub deployment: Deployment,
    /// `false` when the existing deployment was reused
    pub newly_deployed: bool,
}

/// Progress of a single deploy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    NotStarted,
    Diffing,
    Skipped,
    Deploying,
    Submitted,
    Confirmed,
    Persisted,
    Failed,
}

impl DeployStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeployStage::Skipped | DeployStage::Persisted | DeployStage::Failed
        )
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Transaction that has to be signed out-of-band by its sender
#[derive(Debug, Clone, Serialize)]
pub struct ManualAction {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Creation code followed by the ABI-encoded constructor arguments
pub fn encode_creation_data(abi: &Abi, bytecode: &Bytes, args: &[Token]) -> DeployerResult<Bytes> {
    match &abi.constructor {
        Some(constructor) => Ok(constructor.encode_input(bytecode.to_vec(), args)?.into()),
        None if args.is_empty() => Ok(bytecode.clone()),
        None => Err(ethers::abi::Error::InvalidData.into()),
    }
}
