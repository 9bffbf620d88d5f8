//! Signer resolution
//!
//! A sender identifier is either a raw 32-byte private key, which always
//! yields a local signer, or an address, which is only signable when the node
//! manages that account.

use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Capability to sign for one sender address
#[derive(Debug, Clone)]
pub enum SignerHandle {
    /// Key held in-process
    Local(LocalWallet),
    /// Account managed by the node, signed via `eth_sendTransaction`
    Managed(Address),
}

impl SignerHandle {
    pub fn address(&self) -> Address {
        match self {
            SignerHandle::Local(wallet) => wallet.address(),
            SignerHandle::Managed(address) => *address,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SignerHandle::Local(_))
    }
}

/// Whether `from` is a hex-encoded 32-byte private key (`0x` optional)
pub fn is_private_key(from: &str) -> bool {
    let body = from.strip_prefix("0x").unwrap_or(from);
    body.len() == 64 && body.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_wallet(from: &str) -> DeployerResult<LocalWallet> {
    let body = from.strip_prefix("0x").unwrap_or(from);
    body.parse::<LocalWallet>()
        .map_err(|e| DeployerError::Wallet(format!("Invalid private key: {}", e)))
}

/// Resolves sender identifiers into signers for one session
pub struct SignerResolver {
    client: Arc<dyn ChainClient>,
    chain_id: u64,
    /// Node-managed accounts, fetched once
    known_accounts: OnceCell<HashSet<Address>>,
}

impl SignerResolver {
    pub fn new(client: Arc<dyn ChainClient>, chain_id: u64) -> Self {
        Self {
            client,
            chain_id,
            known_accounts: OnceCell::new(),
        }
    }

    /// Sender address for an identifier, without requiring a signer
    pub fn address_of(from: &str) -> DeployerResult<Address> {
        if from.is_empty() {
            return Err(DeployerError::InvalidFrom("no from specified".to_string()));
        }
        if is_private_key(from) {
            return Ok(parse_wallet(from)?.address());
        }
        Address::from_str(from).map_err(|_| DeployerError::InvalidFrom(from.to_string()))
    }

    /// Resolve `from`, failing when nothing can sign for it
    pub async fn resolve(&self, from: &str) -> DeployerResult<SignerHandle> {
        self.resolve_optional(from)
            .await?
            .ok_or_else(|| DeployerError::NoSigner {
                address: from.to_string(),
            })
    }

    /// Resolve `from`, returning `None` for addresses the node does not manage
    pub async fn resolve_optional(&self, from: &str) -> DeployerResult<Option<SignerHandle>> {
        if is_private_key(from) {
            let wallet = parse_wallet(from)?.with_chain_id(self.chain_id);
            return Ok(Some(SignerHandle::Local(wallet)));
        }

        let address = Self::address_of(from)?;
        if self.known_accounts().await.contains(&address) {
            Ok(Some(SignerHandle::Managed(address)))
        } else {
            debug!("No managed account for {:?}", address);
            Ok(None)
        }
    }

    async fn known_accounts(&self) -> &HashSet<Address> {
        self.known_accounts
            .get_or_init(|| async {
                match self.client.accounts().await {
                    Ok(accounts) => {
                        debug!("Node manages {} accounts", accounts.len());
                        accounts.into_iter().collect()
                    }
                    Err(e) => {
                        warn!("Failed to list node accounts: {}", e);
                        HashSet::new()
                    }
                }
            })
            .await
    }
}
