//! Balance reads. These are display paths and deliberately fail open:
//! a store error is logged and reported as a zero balance rather than
//! surfaced, so a flaky read never takes a profile page down with it.
use super::error::LedgerError;
use super::store::LedgerStore;
use super::transaction::{PointTransaction, TimeStamp};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::error;

/// One row of the per-creator aggregation: everything the "points
/// expiring soon" UI needs for a single creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorBalance {
    pub creator_id: String,
    pub available: i64,
    pub expiring_soon: i64,
    pub earliest_expiry: Option<TimeStamp<Utc>>,
}

/// Available (unexpired, unused) points a user holds with one creator.
pub fn available_points(
    store: &LedgerStore,
    user_id: &str,
    creator_id: &str,
    now: &TimeStamp<Utc>,
) -> i64 {
    match try_available_points(store, user_id, creator_id, now) {
        Ok(total) => total,
        Err(err) => {
            error!(user = %user_id, creator = %creator_id, %err, "balance read failed, reporting zero");
            0
        }
    }
}

fn try_available_points(
    store: &LedgerStore,
    user_id: &str,
    creator_id: &str,
    now: &TimeStamp<Utc>,
) -> Result<i64, LedgerError> {
    let total = store
        .transactions_for_pair(user_id, creator_id)?
        .iter()
        .filter(|txn| txn.is_spendable(now))
        .map(spendable_value)
        .sum();
    Ok(total)
}

/// Per-creator aggregation for one user: available total, the slice of it
/// expiring within `soon_window_days`, and the earliest expiry. One pass
/// over the user's records, grouped in memory.
pub fn points_by_creator(
    store: &LedgerStore,
    user_id: &str,
    now: &TimeStamp<Utc>,
    soon_window_days: i64,
) -> Vec<CreatorBalance> {
    match try_points_by_creator(store, user_id, now, soon_window_days) {
        Ok(rows) => rows,
        Err(err) => {
            error!(user = %user_id, %err, "per-creator balance read failed, reporting empty");
            vec![]
        }
    }
}

fn try_points_by_creator(
    store: &LedgerStore,
    user_id: &str,
    now: &TimeStamp<Utc>,
    soon_window_days: i64,
) -> Result<Vec<CreatorBalance>, LedgerError> {
    let soon_cutoff = now.plus_days(soon_window_days);
    let mut groups: BTreeMap<String, CreatorBalance> = BTreeMap::new();

    for txn in store.transactions_for_user(user_id)? {
        if !txn.is_spendable(now) {
            continue;
        }

        let row = groups
            .entry(txn.creator_id.clone())
            .or_insert_with(|| CreatorBalance {
                creator_id: txn.creator_id.clone(),
                available: 0,
                expiring_soon: 0,
                earliest_expiry: None,
            });

        let value = spendable_value(&txn);
        row.available += value;

        if let Some(expires_at) = &txn.expires_at {
            if *expires_at <= soon_cutoff {
                row.expiring_soon += value;
            }
            match &row.earliest_expiry {
                Some(earliest) if earliest <= expires_at => {}
                _ => row.earliest_expiry = Some(expires_at.clone()),
            }
        }
    }

    Ok(groups.into_values().collect())
}

// Stray negative or corrupted amounts on credit rows contribute nothing.
fn spendable_value(txn: &PointTransaction) -> i64 {
    txn.amount.max(0)
}
