//! Chain submitter: the custodial signing identity and its nonce, plus
//! broadcast and confirmation of value transfers.

use crate::error::{FaucetError, RpcError, SubmitError};
use crate::rpc::BlockchainRpcClient;
use async_trait::async_trait;
use drip_common::types::{Address, TxHash};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of a broadcast transfer as far as the node can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Accepted by the node, not yet included.
    Submitted,
    Confirmed,
    Reverted,
    /// Included, but the receipt carries no execution status.
    Unknown,
}

/// A transfer observed as included and successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainSubmitter: Send + Sync {
    /// Account the faucet pays from.
    fn sender(&self) -> Address;

    /// Sign and broadcast. Calls are serialized across the whole process.
    async fn broadcast(&self, to: &Address, amount: u128) -> Result<TxHash, SubmitError>;

    /// Block until the transfer is included or the bounded wait runs out.
    async fn confirm(&self, tx_hash: &TxHash) -> Result<Confirmation, SubmitError>;

    /// Single receipt lookup, no waiting.
    async fn status(&self, tx_hash: &TxHash) -> Result<TransferStatus, RpcError>;

    async fn balance(&self) -> Result<u128, RpcError>;

    async fn transfer(&self, to: &Address, amount: u128) -> Result<Confirmation, SubmitError> {
        let tx_hash = self.broadcast(to, amount).await?;
        self.confirm(&tx_hash).await
    }
}

/// EIP-155 legacy value transfer with empty calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub tx_hash: TxHash,
}

impl LegacyTransaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&self.value);
        stream.append_empty_data();
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        keccak_hash::keccak(stream.out()).0
    }

    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction, k256::ecdsa::Error> {
        let hash = self.signing_hash();
        let (signature, recovery_id) = key.sign_prehash_recoverable(&hash)?;
        let (r, s) = signature.split_bytes();
        let v = self.chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&r));
        stream.append(&trim_leading_zeros(&s));

        let raw = stream.out().to_vec();
        let tx_hash = TxHash(keccak_hash::keccak(&raw).0);
        Ok(SignedTransaction { raw, tx_hash })
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Parse a hex private key (with or without `0x`).
pub fn signing_key_from_hex(private_key: &str) -> Result<SigningKey, FaucetError> {
    let trimmed = private_key.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| FaucetError::InvalidKey(e.to_string()))?;
    SigningKey::from_slice(&bytes).map_err(|e| FaucetError::InvalidKey(e.to_string()))
}

pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    Address::from_uncompressed_public_key(point.as_bytes())
}

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub chain_id: Option<u64>,
    pub gas_price: Option<u128>,
    pub gas_limit: u64,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        Self {
            chain_id: None,
            gas_price: None,
            gas_limit: 21000,
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            max_poll_failures: 5,
        }
    }
}

/// Sequencing state of the signing identity. Only touched under the
/// submission lock.
#[derive(Debug, Default)]
struct SignerState {
    chain_id: Option<u64>,
    /// Cached next nonce; `None` forces a resync from the node.
    nonce: Option<u64>,
}

/// Submitter backed by a JSON-RPC node.
pub struct RpcChainSubmitter {
    rpc: Arc<BlockchainRpcClient>,
    signing_key: SigningKey,
    address: Address,
    settings: SubmitterSettings,
    signer: Mutex<SignerState>,
}

impl RpcChainSubmitter {
    pub fn new(
        rpc: Arc<BlockchainRpcClient>,
        signing_key: SigningKey,
        settings: SubmitterSettings,
    ) -> Self {
        let address = address_of(&signing_key);
        info!("Faucet address: {}", address.to_checksum());
        Self {
            rpc,
            signing_key,
            address,
            settings,
            signer: Mutex::new(SignerState::default()),
        }
    }

    async fn resolve_chain_id(&self, state: &mut SignerState) -> Result<u64, RpcError> {
        if let Some(id) = state.chain_id.or(self.settings.chain_id) {
            state.chain_id = Some(id);
            return Ok(id);
        }
        let id = self.rpc.chain_id().await?;
        debug!(chain_id = id, "chain id resolved from node");
        state.chain_id = Some(id);
        Ok(id)
    }

    async fn poll_receipt(&self, tx_hash: &TxHash) -> Result<Confirmation, SubmitError> {
        let mut failures = 0u32;
        loop {
            match self.rpc.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return match receipt.success {
                        Some(false) => Err(SubmitError::Reverted { tx_hash: *tx_hash }),
                        _ => Ok(Confirmation {
                            tx_hash: *tx_hash,
                            block_number: receipt.block_number,
                        }),
                    };
                }
                Ok(None) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(%tx_hash, failures, "receipt poll failed: {}", e);
                    if failures >= self.settings.max_poll_failures {
                        return Err(SubmitError::ConfirmationTimeout {
                            tx_hash: *tx_hash,
                            reason: format!("node unreachable after {} polls: {}", failures, e),
                        });
                    }
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

fn submission_error(stage: &str, err: RpcError) -> SubmitError {
    SubmitError::Submission(format!("{}: {}", stage, err))
}

#[async_trait]
impl ChainSubmitter for RpcChainSubmitter {
    fn sender(&self) -> Address {
        self.address
    }

    async fn broadcast(&self, to: &Address, amount: u128) -> Result<TxHash, SubmitError> {
        if to.is_zero() {
            return Err(SubmitError::InvalidAddress("zero address not allowed".to_string()));
        }
        if *to == self.address {
            return Err(SubmitError::InvalidAddress("cannot send to faucet address".to_string()));
        }

        let mut state = self.signer.lock().await;

        let chain_id = self
            .resolve_chain_id(&mut state)
            .await
            .map_err(|e| submission_error("chain id", e))?;
        let nonce = match state.nonce {
            Some(nonce) => nonce,
            None => self
                .rpc
                .get_transaction_count(&self.address)
                .await
                .map_err(|e| submission_error("nonce", e))?,
        };
        let gas_price = match self.settings.gas_price {
            Some(price) => price,
            None => self
                .rpc
                .gas_price()
                .await
                .map_err(|e| submission_error("gas price", e))?,
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: self.settings.gas_limit,
            to: *to,
            value: amount,
            chain_id,
        };
        let signed = tx
            .sign(&self.signing_key)
            .map_err(|e| SubmitError::Submission(format!("signing: {}", e)))?;

        match self.rpc.send_raw_transaction(&signed.raw).await {
            Ok(tx_hash) => {
                if tx_hash != signed.tx_hash {
                    warn!(node = %tx_hash, local = %signed.tx_hash, "node reported a different tx hash");
                }
                state.nonce = Some(nonce + 1);
                info!(%tx_hash, nonce, to = %to, "Transaction sent");
                Ok(tx_hash)
            }
            Err(e) => {
                state.nonce = None;
                match e {
                    RpcError::Node { .. } | RpcError::Transport { delivered: false, .. } => {
                        Err(submission_error("broadcast", e))
                    }
                    other => Err(SubmitError::BroadcastUnacknowledged {
                        tx_hash: signed.tx_hash,
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    async fn confirm(&self, tx_hash: &TxHash) -> Result<Confirmation, SubmitError> {
        match tokio::time::timeout(self.settings.confirmation_timeout, self.poll_receipt(tx_hash)).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::ConfirmationTimeout {
                tx_hash: *tx_hash,
                reason: format!(
                    "no receipt within {}s",
                    self.settings.confirmation_timeout.as_secs()
                ),
            }),
        }
    }

    async fn status(&self, tx_hash: &TxHash) -> Result<TransferStatus, RpcError> {
        Ok(match self.rpc.get_transaction_receipt(tx_hash).await? {
            None => TransferStatus::Submitted,
            Some(receipt) => match receipt.success {
                Some(true) => TransferStatus::Confirmed,
                Some(false) => TransferStatus::Reverted,
                None => TransferStatus::Unknown,
            },
        })
    }

    async fn balance(&self) -> Result<u128, RpcError> {
        self.rpc.get_balance(&self.address).await
    }
}
