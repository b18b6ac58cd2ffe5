//! Scheduled sweeps over the ledger: expiring stale credits into
//! compensating debits, and warning users ahead of time.
//!
//! Both entry points take an explicit `now` so the external scheduler
//! (and the tests) own the clock. The expiry sweep is idempotent: the
//! `expired` flag it sets excludes processed rows from every later run.
use super::error::LedgerError;
use super::notify::{Notification, NotificationKind};
use super::store::{LedgerStore, PairLocks};
use super::transaction::{PointTransaction, TimeStamp, TransactionKind};
use crate::utils;
use chrono::Utc;
use sled::Batch;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Audit record written once per (user, creator) group the sweep expires,
/// naming the original transactions folded into the compensating entry.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub struct ExpiredPointsAudit {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub creator_id: String,
    #[n(3)]
    pub transaction_ids: Vec<String>,
    #[n(4)]
    pub total: i64,
    #[n(5)]
    pub processed_at: TimeStamp<Utc>,
}

/// What one sweep pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub groups_processed: usize,
    pub points_expired: i64,
    pub groups_failed: usize,
}

/// Expire every overdue, unused credit. Per (user, creator) group: flag
/// the members `expired`, write one audit record, write one compensating
/// `Expired` debit, and queue a notification — all in one batch, under
/// the pair's lock. A failing group is logged and skipped; the remaining
/// groups still run.
pub fn process_expired_points(
    store: &LedgerStore,
    locks: &PairLocks,
    now: &TimeStamp<Utc>,
) -> Result<SweepReport, LedgerError> {
    let mut report = SweepReport::default();

    for ((user_id, creator_id), group) in overdue_groups(store, now)? {
        let total: i64 = group.iter().map(|txn| txn.amount.max(0)).sum();
        if total <= 0 {
            continue;
        }

        let lock = locks.pair(&user_id, &creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match expire_group(store, &user_id, &creator_id, &group, total, now) {
            Ok(()) => {
                report.groups_processed += 1;
                report.points_expired += total;
            }
            Err(err) => {
                error!(user = %user_id, creator = %creator_id, %err, "expiry sweep failed for group");
                report.groups_failed += 1;
            }
        }
    }

    info!(
        groups = report.groups_processed,
        points = report.points_expired,
        failed = report.groups_failed,
        "expiry sweep finished"
    );
    Ok(report)
}

fn expire_group(
    store: &LedgerStore,
    user_id: &str,
    creator_id: &str,
    group: &[PointTransaction],
    total: i64,
    now: &TimeStamp<Utc>,
) -> Result<(), LedgerError> {
    let member_ids: Vec<String> = group.iter().map(|txn| txn.id.clone()).collect();
    let mut batch = Batch::default();

    for txn in group {
        let mut flagged = txn.clone();
        flagged.expired = true;
        LedgerStore::stage_transaction(&mut batch, &flagged)?;
    }

    let audit = ExpiredPointsAudit {
        id: utils::new_audit_id(),
        user_id: user_id.into(),
        creator_id: creator_id.into(),
        transaction_ids: member_ids.clone(),
        total,
        processed_at: now.clone(),
    };
    LedgerStore::stage_expiry_audit(&mut batch, &audit)?;

    let compensating = PointTransaction::new(
        user_id,
        creator_id,
        -total,
        TransactionKind::Expired,
        now.clone(),
    )?
    .with_description(&format!("{total} points expired"))
    .with_related(member_ids);
    LedgerStore::stage_transaction(&mut batch, &compensating)?;

    let notification = Notification::new(
        user_id,
        NotificationKind::PointsExpired,
        "Points expired",
        &format!("{total} of your points with {creator_id} have expired"),
    );
    LedgerStore::stage_notification(&mut batch, &notification)?;

    store.apply(batch)
}

/// Warn each (user, creator) pair holding credits that expire within the
/// lookahead window. Read-only on the ledger; only the outbox grows.
/// Returns the number of pairs warned.
pub fn send_expiry_warnings(
    store: &LedgerStore,
    now: &TimeStamp<Utc>,
    lookahead_days: i64,
) -> Result<usize, LedgerError> {
    let cutoff = now.plus_days(lookahead_days);
    let mut groups: BTreeMap<(String, String), (i64, TimeStamp<Utc>)> = BTreeMap::new();

    for txn in store.all_transactions()? {
        if !txn.is_spendable(now) {
            continue;
        }
        let Some(expires_at) = txn.expires_at.clone() else {
            continue;
        };
        if expires_at > cutoff {
            continue;
        }

        let key = (txn.user_id.clone(), txn.creator_id.clone());
        match groups.get_mut(&key) {
            Some((total, earliest)) => {
                *total += txn.amount.max(0);
                if expires_at < *earliest {
                    *earliest = expires_at;
                }
            }
            None => {
                groups.insert(key, (txn.amount.max(0), expires_at));
            }
        }
    }

    let mut warned = 0;
    for ((user_id, creator_id), (total, earliest)) in groups {
        let days_left = now.days_until(&earliest).max(0);
        let notification = Notification::new(
            &user_id,
            NotificationKind::PointsExpiringSoon { days_left },
            "Points expiring soon",
            &format!("{total} points with {creator_id} expire in {days_left} days"),
        );

        let mut batch = Batch::default();
        LedgerStore::stage_notification(&mut batch, &notification)?;
        store.apply(batch)?;
        warned += 1;
    }

    Ok(warned)
}

type Groups = BTreeMap<(String, String), Vec<PointTransaction>>;

// Overdue, unused, unexpired credits grouped per (user, creator) pair.
fn overdue_groups(store: &LedgerStore, now: &TimeStamp<Utc>) -> Result<Groups, LedgerError> {
    let mut groups = Groups::new();

    for txn in store.all_transactions()? {
        if !txn.kind.is_credit() || txn.expired || txn.used {
            continue;
        }
        let overdue = matches!(&txn.expires_at, Some(at) if at < now);
        if !overdue {
            continue;
        }

        groups
            .entry((txn.user_id.clone(), txn.creator_id.clone()))
            .or_default()
            .push(txn);
    }

    Ok(groups)
}
