//! Persistence layer over an embedded sled database.
//!
//! All record families share the default tree under namespaced keys, so a
//! single [`sled::Batch`] can commit a ledger mutation, its audit rows and
//! its queued notifications as one unit:
//!
//! - `txn/{user}/{creator}/{txn_id}` — point transactions, prefix-scannable
//!   per (user, creator) pair or per user
//! - `rdm/{redemption_id}` — redemptions
//! - `item/{item_id}` — vault items
//! - `audit/{audit_id}` — expiry sweep audit records
//! - `outbox/{uuid7}` — queued notifications; uuid7 keys drain in
//!   enqueue order
use super::error::LedgerError;
use super::expiry::ExpiredPointsAudit;
use super::notify::Notification;
use super::redemption::Redemption;
use super::transaction::PointTransaction;
use super::vault::VaultItem;
use sled::Batch;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid7::uuid7;

const TXN_NS: &str = "txn/";
const RDM_NS: &str = "rdm/";
const ITEM_NS: &str = "item/";
const AUDIT_NS: &str = "audit/";
const OUTBOX_NS: &str = "outbox/";

/// Explicitly constructed persistence handle. Opened once at process
/// start and injected into the service; nothing in the crate reaches for
/// implicit global connection state.
pub struct LedgerStore {
    instance: Arc<sled::Db>,
}

impl LedgerStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path)?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Flush pending writes to disk; call on shutdown.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Apply a staged batch as one atomic unit.
    pub fn apply(&self, batch: Batch) -> Result<(), LedgerError> {
        self.instance.apply_batch(batch)?;
        Ok(())
    }

    fn txn_key(user_id: &str, creator_id: &str, txn_id: &str) -> String {
        format!("{TXN_NS}{user_id}/{creator_id}/{txn_id}")
    }

    // TRANSACTIONS

    pub fn put_transaction(&self, txn: &PointTransaction) -> Result<(), LedgerError> {
        let key = Self::txn_key(&txn.user_id, &txn.creator_id, &txn.id);
        self.instance.insert(key.as_bytes(), encode(txn)?)?;
        Ok(())
    }

    /// Stage a transaction write into a batch without applying it.
    pub fn stage_transaction(batch: &mut Batch, txn: &PointTransaction) -> Result<(), LedgerError> {
        let key = Self::txn_key(&txn.user_id, &txn.creator_id, &txn.id);
        batch.insert(key.as_bytes(), encode(txn)?);
        Ok(())
    }

    /// Every transaction for one (user, creator) ledger.
    pub fn transactions_for_pair(
        &self,
        user_id: &str,
        creator_id: &str,
    ) -> Result<Vec<PointTransaction>, LedgerError> {
        self.scan_values(&format!("{TXN_NS}{user_id}/{creator_id}/"))
    }

    /// Every transaction a user holds, across all creators.
    pub fn transactions_for_user(&self, user_id: &str) -> Result<Vec<PointTransaction>, LedgerError> {
        self.scan_values(&format!("{TXN_NS}{user_id}/"))
    }

    /// Full ledger scan, for the expiry sweep.
    pub fn all_transactions(&self) -> Result<Vec<PointTransaction>, LedgerError> {
        self.scan_values(TXN_NS)
    }

    // REDEMPTIONS

    pub fn get_redemption(&self, redemption_id: &str) -> Result<Option<Redemption>, LedgerError> {
        let key = format!("{RDM_NS}{redemption_id}");
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_redemption(&self, redemption: &Redemption) -> Result<(), LedgerError> {
        let key = format!("{RDM_NS}{}", redemption.id);
        self.instance.insert(key.as_bytes(), encode(redemption)?)?;
        Ok(())
    }

    pub fn stage_redemption(batch: &mut Batch, redemption: &Redemption) -> Result<(), LedgerError> {
        let key = format!("{RDM_NS}{}", redemption.id);
        batch.insert(key.as_bytes(), encode(redemption)?);
        Ok(())
    }

    /// Full redemption scan, for the stale-claim sweep.
    pub fn all_redemptions(&self) -> Result<Vec<Redemption>, LedgerError> {
        self.scan_values(RDM_NS)
    }

    /// Live (non-refunded) claims a fan holds against one item; drives
    /// the per-user limit check.
    pub fn live_claims_for(&self, fan_id: &str, item_id: &str) -> Result<u32, LedgerError> {
        use super::redemption::RedemptionStatus::{Cancelled, Rejected};

        let count = self
            .all_redemptions()?
            .into_iter()
            .filter(|r| r.fan_id == fan_id && r.item_id == item_id)
            .filter(|r| !matches!(r.status, Rejected | Cancelled))
            .count();
        Ok(count as u32)
    }

    // VAULT ITEMS

    pub fn get_vault_item(&self, item_id: &str) -> Result<Option<VaultItem>, LedgerError> {
        let key = format!("{ITEM_NS}{item_id}");
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_vault_item(&self, item: &VaultItem) -> Result<(), LedgerError> {
        let key = format!("{ITEM_NS}{}", item.id);
        self.instance.insert(key.as_bytes(), encode(item)?)?;
        Ok(())
    }

    pub fn stage_vault_item(batch: &mut Batch, item: &VaultItem) -> Result<(), LedgerError> {
        let key = format!("{ITEM_NS}{}", item.id);
        batch.insert(key.as_bytes(), encode(item)?);
        Ok(())
    }

    // AUDIT

    pub fn stage_expiry_audit(
        batch: &mut Batch,
        audit: &ExpiredPointsAudit,
    ) -> Result<(), LedgerError> {
        let key = format!("{AUDIT_NS}{}", audit.id);
        batch.insert(key.as_bytes(), encode(audit)?);
        Ok(())
    }

    pub fn all_expiry_audits(&self) -> Result<Vec<ExpiredPointsAudit>, LedgerError> {
        self.scan_values(AUDIT_NS)
    }

    // OUTBOX

    pub fn stage_notification(
        batch: &mut Batch,
        notification: &Notification,
    ) -> Result<(), LedgerError> {
        let key = format!("{OUTBOX_NS}{}", uuid7());
        batch.insert(key.as_bytes(), encode(notification)?);
        Ok(())
    }

    pub fn outbox_entries(&self) -> Result<Vec<(sled::IVec, Notification)>, LedgerError> {
        let mut entries = vec![];
        for kv in self.instance.scan_prefix(OUTBOX_NS.as_bytes()) {
            let (key, value) = kv?;
            entries.push((key, decode(&value)?));
        }
        Ok(entries)
    }

    pub fn remove_outbox_entry(&self, key: &sled::IVec) -> Result<(), LedgerError> {
        self.instance.remove(key)?;
        Ok(())
    }

    fn scan_values<T: for<'b> minicbor::Decode<'b, ()>>(
        &self,
        prefix: &str,
    ) -> Result<Vec<T>, LedgerError> {
        let mut values = vec![];
        for kv in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, value) = kv?;
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LedgerError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, LedgerError> {
    Ok(minicbor::decode(bytes)?)
}

/// Serializes read-modify-write access to one (user, creator) ledger.
/// Spend, refund and expiry for the same pair take the pair's lock so the
/// balance check and its consequent writes act as a unit; independent
/// pairs proceed in parallel.
#[derive(Default)]
pub struct PairLocks {
    inner: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating on first use) the lock for a pair. Callers hold the
    /// returned handle and lock it for the duration of the operation.
    pub fn pair(&self, user_id: &str, creator_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry((user_id.to_string(), creator_id.to_string()))
            .or_default()
            .clone()
    }
}

/// Serializes supply accounting for one vault item. Redeems, refunds and
/// limit changes for the same item take its lock so the availability
/// check, the `claimed` counter and the limits act as a unit; where an
/// operation also needs a pair lock, the item lock is taken first.
#[derive(Default)]
pub struct ItemLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, item_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(item_id.to_string()).or_default().clone()
    }
}
