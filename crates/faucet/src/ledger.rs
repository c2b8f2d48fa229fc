//! Claim ledger: durable last-claim timestamps and the write-ahead intent log.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drip_common::types::{Address, TxHash};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

/// Most recent successful claim of one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub address: Address,
    pub last_claim_at: DateTime<Utc>,
    pub tx_hash: TxHash,
}

/// Durable note that a claim attempt started and may have moved funds.
///
/// Written before broadcast, stamped with the transaction hash once the node
/// accepts it, and removed when the attempt resolves either way. An intent
/// that outlives its attempt marks an address whose payout state is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimIntent {
    pub address: Address,
    pub started_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
}

impl ClaimIntent {
    pub fn new(address: Address, started_at: DateTime<Utc>) -> Self {
        Self { address, started_at, tx_hash: None }
    }
}

#[async_trait]
pub trait ClaimLedger: Send + Sync {
    async fn last_claim(&self, address: &Address) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Upsert. A stored timestamp later than `at` is kept.
    async fn record_claim(
        &self,
        address: &Address,
        at: DateTime<Utc>,
        tx_hash: TxHash,
    ) -> Result<(), StorageError>;

    async fn claim_count(&self) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait IntentLog: Send + Sync {
    async fn begin_intent(&self, intent: &ClaimIntent) -> Result<(), StorageError>;
    async fn mark_broadcast(&self, address: &Address, tx_hash: TxHash) -> Result<(), StorageError>;
    async fn clear_intent(&self, address: &Address) -> Result<(), StorageError>;
    async fn pending_intent(&self, address: &Address) -> Result<Option<ClaimIntent>, StorageError>;
    async fn pending_intents(&self) -> Result<Vec<ClaimIntent>, StorageError>;
}

/// sled-backed ledger. Keys are normalized lowercase `0x` addresses.
#[derive(Clone)]
pub struct SledLedger {
    db: Db,
    claims: Tree,
    intents: Tree,
}

impl SledLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        info!("Opening claim ledger at: {}", path.as_ref().display());
        let db = sled::Config::default().path(path).open()?;
        Self::from_db(db)
    }

    /// In-memory ledger that disappears on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::default().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let claims = db.open_tree("claims")?;
        let intents = db.open_tree("claim_intents")?;
        Ok(Self { db, claims, intents })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn key(address: &Address) -> Vec<u8> {
    address.to_string().into_bytes()
}

#[async_trait]
impl ClaimLedger for SledLedger {
    async fn last_claim(&self, address: &Address) -> Result<Option<DateTime<Utc>>, StorageError> {
        let tree = self.claims.clone();
        let key = key(address);

        tokio::task::spawn_blocking(move || -> Result<_, StorageError> {
            match tree.get(&key)? {
                Some(bytes) => {
                    let record: ClaimRecord = bincode::deserialize(&bytes)?;
                    Ok(Some(record.last_claim_at))
                }
                None => Ok(None),
            }
        })
        .await?
    }

    async fn record_claim(
        &self,
        address: &Address,
        at: DateTime<Utc>,
        tx_hash: TxHash,
    ) -> Result<(), StorageError> {
        let tree = self.claims.clone();
        let key = key(address);
        let fresh = bincode::serialize(&ClaimRecord {
            address: *address,
            last_claim_at: at,
            tx_hash,
        })?;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            tree.update_and_fetch(&key, |existing| {
                let newer = existing
                    .and_then(|bytes| bincode::deserialize::<ClaimRecord>(bytes).ok())
                    .filter(|record| record.last_claim_at > at);
                match (newer, existing) {
                    (Some(_), Some(bytes)) => Some(bytes.to_vec()),
                    _ => Some(fresh.clone()),
                }
            })?;
            tree.flush()?;
            Ok(())
        })
        .await??;

        debug!("Recorded claim for {} at {}", address, at);
        Ok(())
    }

    async fn claim_count(&self) -> Result<usize, StorageError> {
        let tree = self.claims.clone();
        Ok(tokio::task::spawn_blocking(move || tree.len()).await?)
    }
}

#[async_trait]
impl IntentLog for SledLedger {
    async fn begin_intent(&self, intent: &ClaimIntent) -> Result<(), StorageError> {
        let tree = self.intents.clone();
        let key = key(&intent.address);
        let value = bincode::serialize(intent)?;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            tree.insert(key, value)?;
            tree.flush()?;
            Ok(())
        })
        .await?
    }

    async fn mark_broadcast(&self, address: &Address, tx_hash: TxHash) -> Result<(), StorageError> {
        let tree = self.intents.clone();
        let key = key(address);
        let address = *address;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut intent = match tree.get(&key)? {
                Some(bytes) => bincode::deserialize::<ClaimIntent>(&bytes)?,
                None => ClaimIntent::new(address, Utc::now()),
            };
            intent.tx_hash = Some(tx_hash);
            tree.insert(key, bincode::serialize(&intent)?)?;
            tree.flush()?;
            Ok(())
        })
        .await?
    }

    async fn clear_intent(&self, address: &Address) -> Result<(), StorageError> {
        let tree = self.intents.clone();
        let key = key(address);

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            tree.remove(key)?;
            tree.flush()?;
            Ok(())
        })
        .await?
    }

    async fn pending_intent(&self, address: &Address) -> Result<Option<ClaimIntent>, StorageError> {
        let tree = self.intents.clone();
        let key = key(address);

        tokio::task::spawn_blocking(move || -> Result<Option<ClaimIntent>, StorageError> {
            match tree.get(&key)? {
                Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn pending_intents(&self) -> Result<Vec<ClaimIntent>, StorageError> {
        let tree = self.intents.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<ClaimIntent>, StorageError> {
            let mut intents = Vec::new();
            for item in tree.iter() {
                let (_, value) = item?;
                intents.push(bincode::deserialize::<ClaimIntent>(&value)?);
            }
            intents.sort_by_key(|intent| intent.started_at);
            Ok(intents)
        })
        .await?
    }
}
