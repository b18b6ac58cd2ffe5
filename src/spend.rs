//! FIFO spend planning. Candidates are consumed oldest-expiring first so
//! the points closest to expiring are burned before longer-lived ones.
//!
//! Planning is pure: [`plan_spend`] decides which records are fully
//! consumed and whether the boundary record splits, without touching the
//! store. The service applies a plan as a single batch, so a shortfall is
//! rejected before anything is written.
use super::error::LedgerError;
use super::transaction::PointTransaction;
use std::cmp::Ordering;

/// Result of an applied spend.
#[derive(Debug, Clone)]
pub struct SpendOutcome {
    pub amount_spent: i64,
    /// Id of the `Spent` audit row recording the debit.
    pub spent_txn_id: String,
    /// Ids of the credit records consumed (including a split sibling).
    pub consumed: Vec<String>,
}

/// Which candidates a spend consumes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPlan {
    /// Ids fully consumed, to be flagged `used`.
    pub consumed: Vec<String>,
    /// The boundary record that only partially covers the request, if any.
    pub split: Option<SplitPlan>,
}

/// A split of the boundary record: its stored amount shrinks to
/// `remainder` and a new sibling carries `spent_portion`, already used.
/// Conservation: `remainder + spent_portion` equals the amount before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub original_id: String,
    pub remainder: i64,
    pub spent_portion: i64,
}

/// Oldest-expiring first; never-expiring records go last; creation time
/// then id break ties.
pub fn fifo_order(a: &PointTransaction, b: &PointTransaction) -> Ordering {
    let by_expiry = match (&a.expires_at, &b.expires_at) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Walk already-filtered, FIFO-sorted candidates and decide the spend.
/// Fails with `InsufficientBalance` before naming any record when the
/// candidates cannot cover the request.
pub fn plan_spend(
    candidates: &[PointTransaction],
    points_to_spend: i64,
) -> Result<SpendPlan, LedgerError> {
    if points_to_spend <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "points_to_spend must be positive, got {points_to_spend}"
        )));
    }

    let available: i64 = candidates.iter().map(|txn| txn.amount.max(0)).sum();
    if available < points_to_spend {
        return Err(LedgerError::InsufficientBalance {
            requested: points_to_spend,
            available,
        });
    }

    let mut remaining = points_to_spend;
    let mut plan = SpendPlan {
        consumed: vec![],
        split: None,
    };

    for txn in candidates {
        if remaining == 0 {
            break;
        }
        if txn.amount <= 0 {
            continue;
        }

        if txn.amount <= remaining {
            remaining -= txn.amount;
            plan.consumed.push(txn.id.clone());
        } else {
            plan.split = Some(SplitPlan {
                original_id: txn.id.clone(),
                remainder: txn.amount - remaining,
                spent_portion: remaining,
            });
            remaining = 0;
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TimeStamp, TransactionKind};

    fn credit(amount: i64, expires_in_days: i64) -> PointTransaction {
        let now = TimeStamp::new();
        PointTransaction::new("user_a", "creator_b", amount, TransactionKind::Earned, now.clone())
            .unwrap()
            .expires_at(now.plus_days(expires_in_days))
    }

    #[test]
    fn exact_cover_consumes_without_split() {
        let candidates = vec![credit(100, 10), credit(50, 30)];
        let plan = plan_spend(&candidates, 150).unwrap();

        assert_eq!(plan.consumed.len(), 2);
        assert!(plan.split.is_none());
    }

    #[test]
    fn partial_cover_splits_the_boundary_record() {
        let candidates = vec![credit(100, 10), credit(50, 30)];
        let plan = plan_spend(&candidates, 120).unwrap();

        assert_eq!(plan.consumed, vec![candidates[0].id.clone()]);
        let split = plan.split.unwrap();
        assert_eq!(split.original_id, candidates[1].id);
        assert_eq!(split.spent_portion, 20);
        assert_eq!(split.remainder, 30);
    }

    #[test]
    fn shortfall_is_rejected_up_front() {
        let candidates = vec![credit(100, 10)];
        let err = plan_spend(&candidates, 150).unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                requested: 150,
                available: 100
            }
        ));
    }

    #[test]
    fn fifo_order_puts_never_expiring_last() {
        let mut candidates = vec![
            credit(10, 30).never_expires(),
            credit(10, 30),
            credit(10, 5),
        ];
        candidates.sort_by(fifo_order);

        assert_eq!(
            candidates[0].expires_at,
            Some(candidates[0].created_at.plus_days(5))
        );
        assert!(candidates[2].expires_at.is_none());
    }
}
