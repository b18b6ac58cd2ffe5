//! Property-based tests for FIFO spend planning invariants
//!
//! This module uses the proptest crate to verify that spend planning
//! behaves correctly across a wide range of randomly generated ledgers.
//! Property tests are particularly valuable here: conservation and FIFO
//! ordering must hold for ALL ledgers, not just the hand-picked ones in
//! the scenario suite.

use proptest::prelude::*;

use fampoints_ledger::error::LedgerError;
use fampoints_ledger::spend::{fifo_order, plan_spend};
use fampoints_ledger::transaction::{PointTransaction, TimeStamp, TransactionKind};

// PROPERTY TEST STRATEGIES

/// Strategy to generate a random spendable credit with a bounded amount
/// and expiry horizon
fn credit_strategy() -> impl Strategy<Value = PointTransaction> {
    (1i64..=500, 1i64..=90, prop::bool::ANY).prop_map(|(amount, expiry_days, bonus)| {
        let now = TimeStamp::new();
        let kind = if bonus {
            TransactionKind::Bonus
        } else {
            TransactionKind::Earned
        };
        PointTransaction::new("user_prop", "creator_prop", amount, kind, now.clone())
            .unwrap()
            .expires_at(now.plus_days(expiry_days))
    })
}

/// Strategy to generate a small FIFO-sorted ledger of credits
fn ledger_strategy() -> impl Strategy<Value = Vec<PointTransaction>> {
    prop::collection::vec(credit_strategy(), 1..8).prop_map(|mut ledger| {
        ledger.sort_by(fifo_order);
        ledger
    })
}

fn total(ledger: &[PointTransaction]) -> i64 {
    ledger.iter().map(|txn| txn.amount).sum()
}

// PROPERTY TESTS
proptest! {
    /// Property: a plan always accounts for exactly the requested amount:
    /// fully consumed records plus the split's spent portion sum to the
    /// request, and a split conserves the original's value.
    #[test]
    fn plan_conserves_value(ledger in ledger_strategy(), percent in 1i64..=100) {
        let available = total(&ledger);
        let request = ((available * percent) / 100).max(1);

        let plan = plan_spend(&ledger, request).unwrap();

        let consumed_sum: i64 = ledger
            .iter()
            .filter(|txn| plan.consumed.contains(&txn.id))
            .map(|txn| txn.amount)
            .sum();

        match &plan.split {
            Some(split) => {
                let original = ledger
                    .iter()
                    .find(|txn| txn.id == split.original_id)
                    .unwrap();
                // conservation across the split
                prop_assert_eq!(split.remainder + split.spent_portion, original.amount);
                prop_assert!(split.remainder > 0);
                prop_assert!(split.spent_portion > 0);
                prop_assert_eq!(consumed_sum + split.spent_portion, request);
            }
            None => prop_assert_eq!(consumed_sum, request),
        }
    }

    /// Property: consumption is FIFO — the fully consumed records form a
    /// prefix of the sorted ledger, the split (if any) sits immediately
    /// after the prefix, and everything past it is untouched.
    #[test]
    fn plan_consumes_a_fifo_prefix(ledger in ledger_strategy(), percent in 1i64..=100) {
        let available = total(&ledger);
        let request = ((available * percent) / 100).max(1);

        let plan = plan_spend(&ledger, request).unwrap();

        let prefix_len = plan.consumed.len();
        for (index, txn) in ledger.iter().enumerate() {
            if index < prefix_len {
                prop_assert!(plan.consumed.contains(&txn.id));
            } else if index == prefix_len {
                // boundary: either the split record or untouched entirely
                if let Some(split) = &plan.split {
                    prop_assert_eq!(&split.original_id, &txn.id);
                }
            } else {
                prop_assert!(!plan.consumed.contains(&txn.id));
                if let Some(split) = &plan.split {
                    prop_assert_ne!(&split.original_id, &txn.id);
                }
            }
        }
    }

    /// Property: overdrawing always fails with InsufficientBalance naming
    /// the true available total, and never names any record
    #[test]
    fn overdraw_is_always_rejected(ledger in ledger_strategy(), excess in 1i64..=1000) {
        let available = total(&ledger);
        let err = plan_spend(&ledger, available + excess).unwrap_err();

        match err {
            LedgerError::InsufficientBalance { requested, available: reported } => {
                prop_assert_eq!(requested, available + excess);
                prop_assert_eq!(reported, available);
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Property: non-positive spend requests are invalid regardless of
    /// the ledger contents
    #[test]
    fn non_positive_requests_are_invalid(ledger in ledger_strategy(), bad in -100i64..=0) {
        let err = plan_spend(&ledger, bad).unwrap_err();
        prop_assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    /// Property: a used or expired record is never spendable, whatever
    /// its expiry horizon
    #[test]
    fn used_records_are_never_spendable(credit in credit_strategy()) {
        let now = TimeStamp::new();

        let mut used = credit.clone();
        used.used = true;
        prop_assert!(!used.is_spendable(&now));

        let mut expired = credit;
        expired.expired = true;
        prop_assert!(!expired.is_spendable(&now));
    }
}
