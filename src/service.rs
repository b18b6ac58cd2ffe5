//! Service layer API for ledger and redemption operations
use super::balance::{self, CreatorBalance};
use super::error::LedgerError;
use super::expiry::{self, SweepReport};
use super::notify::{self, Notification, NotificationKind, Notifier};
use super::redemption::{Redemption, RedemptionStatus};
use super::spend::{self, SpendOutcome};
use super::store::{ItemLocks, LedgerStore, PairLocks};
use super::transaction::{PointTransaction, TimeStamp, TransactionKind};
use super::vault::VaultItem;
use crate::utils;
use chrono::Utc;
use sled::Batch;
use tracing::{error, info};

/// Tunable windows, all in days. Defaults match the production policy:
/// credits live 60 days, warnings go out a week ahead, the "expiring
/// soon" aggregation looks 30 days out, and a Pending redemption is
/// auto-cancelled after 60.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub expiry_days: i64,
    pub warning_lookahead_days: i64,
    pub soon_window_days: i64,
    pub redemption_timeout_days: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            expiry_days: 60,
            warning_lookahead_days: 7,
            soon_window_days: 30,
            redemption_timeout_days: 60,
        }
    }
}

pub struct PointsService {
    store: LedgerStore,
    config: ServiceConfig,
    locks: PairLocks,
    item_locks: ItemLocks,
}

impl PointsService {
    pub fn new(store: LedgerStore) -> Self {
        Self::with_config(store, ServiceConfig::default())
    }

    pub fn with_config(store: LedgerStore, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            locks: PairLocks::new(),
            item_locks: ItemLocks::new(),
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    // CREDITS

    /// Record an `Earned` credit from a settled payment.
    pub fn award_points(
        &self,
        user_id: &str,
        creator_id: &str,
        amount: i64,
        payment_ref: &str,
        description: &str,
    ) -> Result<PointTransaction, LedgerError> {
        let now = TimeStamp::new();
        let txn = PointTransaction::new(user_id, creator_id, amount, TransactionKind::Earned, now.clone())?
            .expires_at(now.plus_days(self.config.expiry_days))
            .with_payment_ref(payment_ref)
            .with_description(description);

        let lock = self.locks.pair(user_id, creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.put_transaction(&txn)?;

        Ok(txn)
    }

    /// Record a `Bonus` credit (admin grant, promotion).
    pub fn grant_bonus(
        &self,
        user_id: &str,
        creator_id: &str,
        amount: i64,
        description: &str,
    ) -> Result<PointTransaction, LedgerError> {
        let now = TimeStamp::new();
        let txn = PointTransaction::new(user_id, creator_id, amount, TransactionKind::Bonus, now.clone())?
            .expires_at(now.plus_days(self.config.expiry_days))
            .with_description(description);

        let lock = self.locks.pair(user_id, creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.put_transaction(&txn)?;

        Ok(txn)
    }

    // READS

    /// Available balance for one (user, creator) pair. Fail-open.
    pub fn available_points(&self, user_id: &str, creator_id: &str) -> i64 {
        balance::available_points(&self.store, user_id, creator_id, &TimeStamp::new())
    }

    /// Per-creator balance rows for a user. Fail-open.
    pub fn points_by_creator(&self, user_id: &str) -> Vec<CreatorBalance> {
        balance::points_by_creator(
            &self.store,
            user_id,
            &TimeStamp::new(),
            self.config.soon_window_days,
        )
    }

    /// Full ledger history for one pair, oldest first, for display.
    pub fn pair_history(
        &self,
        user_id: &str,
        creator_id: &str,
    ) -> Result<Vec<PointTransaction>, LedgerError> {
        let mut history = self.store.transactions_for_pair(user_id, creator_id)?;
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(history)
    }

    // SPENDING

    /// Debit `points_to_spend` from a user's balance with a creator,
    /// consuming the oldest-expiring credits first. On a shortfall the
    /// ledger is left untouched.
    pub fn spend_points(
        &self,
        user_id: &str,
        creator_id: &str,
        points_to_spend: i64,
        reason: &str,
    ) -> Result<SpendOutcome, LedgerError> {
        let lock = self.locks.pair(user_id, creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = TimeStamp::new();
        let mut batch = Batch::default();
        let outcome =
            self.stage_spend(&mut batch, user_id, creator_id, points_to_spend, reason, None, &now)?;
        self.store.apply(batch)?;

        Ok(outcome)
    }

    /// Plan a FIFO spend against the current ledger and stage every
    /// resulting write into `batch`. Nothing is applied here; the caller
    /// commits the batch, so a failure at any point writes nothing.
    #[allow(clippy::too_many_arguments)]
    fn stage_spend(
        &self,
        batch: &mut Batch,
        user_id: &str,
        creator_id: &str,
        points_to_spend: i64,
        reason: &str,
        redemption_ref: Option<&str>,
        now: &TimeStamp<Utc>,
    ) -> Result<SpendOutcome, LedgerError> {
        if user_id.is_empty() || creator_id.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "spend requires user and creator ids".into(),
            ));
        }
        if points_to_spend <= 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "points_to_spend must be positive, got {points_to_spend}"
            )));
        }

        let mut candidates: Vec<PointTransaction> = self
            .store
            .transactions_for_pair(user_id, creator_id)?
            .into_iter()
            .filter(|txn| txn.is_spendable(now))
            .collect();
        candidates.sort_by(spend::fifo_order);

        let plan = spend::plan_spend(&candidates, points_to_spend)?;
        let mut consumed_ids = vec![];

        for txn in &candidates {
            if !plan.consumed.contains(&txn.id) {
                continue;
            }
            let mut used = txn.clone();
            used.used = true;
            LedgerStore::stage_transaction(batch, &used)?;
            consumed_ids.push(used.id);
        }

        if let Some(split) = &plan.split {
            let original = candidates
                .iter()
                .find(|txn| txn.id == split.original_id)
                .ok_or_else(|| LedgerError::InvalidState("split names an unknown record".into()))?;

            // the sibling carries the spent portion and inherits the
            // original's kind, source reference and expiry
            let mut sibling = original.clone();
            sibling.id = utils::new_txn_id();
            sibling.amount = split.spent_portion;
            sibling.used = true;
            sibling.related = vec![original.id.clone()];

            let mut reduced = original.clone();
            reduced.amount = split.remainder;
            reduced.related.push(sibling.id.clone());

            LedgerStore::stage_transaction(batch, &sibling)?;
            LedgerStore::stage_transaction(batch, &reduced)?;
            consumed_ids.push(sibling.id);
        }

        // audit/display record of the debit; never itself spendable
        let mut spent = PointTransaction::new(
            user_id,
            creator_id,
            -points_to_spend,
            TransactionKind::Spent,
            now.clone(),
        )?
        .with_description(reason)
        .with_related(consumed_ids.clone());
        if let Some(redemption_id) = redemption_ref {
            spent = spent.with_redemption_ref(redemption_id);
        }
        LedgerStore::stage_transaction(batch, &spent)?;

        Ok(SpendOutcome {
            amount_spent: points_to_spend,
            spent_txn_id: spent.id,
            consumed: consumed_ids,
        })
    }

    // VAULT

    pub fn publish_vault_item(
        &self,
        creator_id: &str,
        title: &str,
        point_cost: i64,
        supply_limit: Option<u32>,
        per_user_limit: Option<u32>,
    ) -> Result<VaultItem, LedgerError> {
        let item =
            VaultItem::new(creator_id, title, point_cost, supply_limit, per_user_limit)?;
        self.store.put_vault_item(&item)?;
        Ok(item)
    }

    /// Raise or remove an item's limits. Tightening is refused.
    pub fn relax_item_limits(
        &self,
        creator_id: &str,
        item_id: &str,
        supply_limit: Option<u32>,
        per_user_limit: Option<u32>,
    ) -> Result<VaultItem, LedgerError> {
        // item lock: a concurrent redeem must not lose its `claimed`
        // increment to this read-modify-write
        let item_lock = self.item_locks.item(item_id);
        let _item_guard = item_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut item = self
            .store
            .get_vault_item(item_id)?
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown vault item {item_id}")))?;

        if item.creator_id != creator_id {
            return Err(LedgerError::Unauthorized {
                expected: item.creator_id,
                got: creator_id.into(),
            });
        }

        item.relax_limits(supply_limit, per_user_limit)?;
        self.store.put_vault_item(&item)?;
        Ok(item)
    }

    // REDEMPTIONS

    /// Fan redeems a vault item: check availability, spend the cost FIFO,
    /// insert the Pending claim. The spend and the claim commit in one
    /// batch; a shortfall aborts before anything is written.
    pub fn redeem_item(
        &self,
        fan_id: &str,
        item_id: &str,
        fan_input: Option<String>,
    ) -> Result<Redemption, LedgerError> {
        // item lock before pair lock, everywhere both are held: the
        // availability check and the `claimed` increment must be one unit
        // across fans, who hold different pair locks
        let item_lock = self.item_locks.item(item_id);
        let _item_guard = item_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut item = self
            .store
            .get_vault_item(item_id)?
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown vault item {item_id}")))?;

        let live_claims = self.store.live_claims_for(fan_id, item_id)?;
        if !item.available_for(live_claims) {
            return Err(LedgerError::InvalidState(format!(
                "'{}' is not available to redeem",
                item.title
            )));
        }

        let lock = self.locks.pair(fan_id, &item.creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = TimeStamp::new();
        let redemption = Redemption::new(
            fan_id,
            &item.creator_id,
            item_id,
            &item.title,
            item.point_cost,
            fan_input,
            now.clone(),
            self.config.redemption_timeout_days,
        )?;

        let mut batch = Batch::default();
        self.stage_spend(
            &mut batch,
            fan_id,
            &item.creator_id,
            item.point_cost,
            &format!("Redeemed '{}'", item.title),
            Some(&redemption.id),
            &now,
        )?;

        item.claimed += 1;
        LedgerStore::stage_vault_item(&mut batch, &item)?;
        LedgerStore::stage_redemption(&mut batch, &redemption)?;
        LedgerStore::stage_notification(
            &mut batch,
            &Notification::new(
                &item.creator_id,
                NotificationKind::RedemptionCreated,
                "New redemption",
                &format!("{fan_id} redeemed '{}'", item.title),
            ),
        )?;
        self.store.apply(batch)?;

        info!(fan = %fan_id, item = %item_id, points = item.point_cost, "redemption created");
        Ok(redemption)
    }

    /// Creator marks a Pending claim delivered. Points stay spent.
    pub fn fulfill_redemption(
        &self,
        creator_id: &str,
        redemption_id: &str,
        response: Option<String>,
    ) -> Result<Redemption, LedgerError> {
        // first read only locates the pair; the decisive Pending check is
        // the re-read under the lock, so a concurrent close wins exactly once
        let located = self.load_pending(creator_id, redemption_id)?;
        let lock = self.locks.pair(&located.fan_id, &located.creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut redemption = self.load_pending(creator_id, redemption_id)?;

        let now = TimeStamp::new();
        redemption.status = RedemptionStatus::Fulfilled;
        redemption.fulfilled_at = Some(now.clone());
        redemption.resolved_at = Some(now);
        redemption.creator_response = response;

        let mut batch = Batch::default();
        LedgerStore::stage_redemption(&mut batch, &redemption)?;
        LedgerStore::stage_notification(
            &mut batch,
            &Notification::new(
                &redemption.fan_id,
                NotificationKind::RedemptionFulfilled,
                "Redemption fulfilled",
                &format!("'{}' has been fulfilled", redemption.item_title),
            ),
        )?;
        self.store.apply(batch)?;

        Ok(redemption)
    }

    /// Creator rejects a Pending claim. The fan is refunded with a fresh
    /// `Refund` credit; the originally-spent records stay as they are.
    pub fn reject_redemption(
        &self,
        creator_id: &str,
        redemption_id: &str,
        reason: &str,
    ) -> Result<Redemption, LedgerError> {
        if reason.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "rejection requires a reason".into(),
            ));
        }

        let redemption = self.load_pending(creator_id, redemption_id)?;
        self.refund_and_close(&redemption, RedemptionStatus::Rejected, Some(reason))
    }

    /// Auto-cancel Pending claims past their deadline, refunding each.
    /// One claim failing is logged and skipped; the sweep continues.
    pub fn cancel_stale_redemptions(&self, now: &TimeStamp<Utc>) -> Result<usize, LedgerError> {
        let mut cancelled = 0;

        for redemption in self.store.all_redemptions()? {
            if redemption.status != RedemptionStatus::Pending || redemption.expires_at > *now {
                continue;
            }
            match self.refund_and_close(&redemption, RedemptionStatus::Cancelled, None) {
                Ok(_) => cancelled += 1,
                // another actor closed it between the scan and the lock
                Err(LedgerError::InvalidState(_)) => {}
                Err(err) => {
                    error!(redemption = %redemption.id, %err, "stale redemption cancel failed");
                }
            }
        }

        Ok(cancelled)
    }

    fn load_pending(
        &self,
        creator_id: &str,
        redemption_id: &str,
    ) -> Result<Redemption, LedgerError> {
        let redemption = self.store.get_redemption(redemption_id)?.ok_or_else(|| {
            LedgerError::InvalidArgument(format!("unknown redemption {redemption_id}"))
        })?;

        if redemption.creator_id != creator_id {
            return Err(LedgerError::Unauthorized {
                expected: redemption.creator_id,
                got: creator_id.into(),
            });
        }
        if redemption.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "redemption is already {:?}",
                redemption.status
            )));
        }

        Ok(redemption)
    }

    /// Close a Pending claim into a refunding terminal state. The refund
    /// is a fresh credit with a fresh expiry clock, preserving the audit
    /// lineage of the spent records.
    fn refund_and_close(
        &self,
        redemption: &Redemption,
        terminal: RedemptionStatus,
        reason: Option<&str>,
    ) -> Result<Redemption, LedgerError> {
        // item lock first, matching redeem_item, then the pair lock
        let item_lock = self.item_locks.item(&redemption.item_id);
        let _item_guard = item_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = self.locks.pair(&redemption.fan_id, &redemption.creator_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // re-read under the locks: the copy the caller checked may have
        // been closed by a concurrent reject, fulfill or stale-cancel
        let redemption = self
            .store
            .get_redemption(&redemption.id)?
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!("unknown redemption {}", redemption.id))
            })?;
        if redemption.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "redemption is already {:?}",
                redemption.status
            )));
        }

        let now = TimeStamp::new();
        let refund = PointTransaction::new(
            &redemption.fan_id,
            &redemption.creator_id,
            redemption.points_spent,
            TransactionKind::Refund,
            now.clone(),
        )?
        .expires_at(now.plus_days(self.config.expiry_days))
        .with_redemption_ref(&redemption.id)
        .with_description(&format!(
            "Refund for '{}' redemption",
            redemption.item_title
        ));

        let mut closed = redemption.clone();
        closed.status = terminal;
        closed.resolved_at = Some(now);
        if let Some(reason) = reason {
            closed.creator_response = Some(reason.into());
        }

        let (kind, title) = match terminal {
            RedemptionStatus::Rejected => (NotificationKind::RedemptionRejected, "Redemption rejected"),
            _ => (NotificationKind::RedemptionCancelled, "Redemption cancelled"),
        };
        let message = match reason {
            Some(reason) => format!(
                "'{}' was declined ({reason}); {} points refunded",
                redemption.item_title, redemption.points_spent
            ),
            None => format!(
                "'{}' timed out; {} points refunded",
                redemption.item_title, redemption.points_spent
            ),
        };

        let mut batch = Batch::default();
        LedgerStore::stage_transaction(&mut batch, &refund)?;
        LedgerStore::stage_redemption(&mut batch, &closed)?;
        // a refunded claim releases its supply slot
        if let Some(mut item) = self.store.get_vault_item(&redemption.item_id)? {
            item.claimed = item.claimed.saturating_sub(1);
            LedgerStore::stage_vault_item(&mut batch, &item)?;
        }
        LedgerStore::stage_notification(
            &mut batch,
            &Notification::new(&redemption.fan_id, kind, title, &message),
        )?;
        self.store.apply(batch)?;

        Ok(closed)
    }

    // SWEEPS & OUTBOX

    /// Run the expiry sweep; see [`expiry::process_expired_points`].
    pub fn process_expired_points(&self, now: &TimeStamp<Utc>) -> Result<SweepReport, LedgerError> {
        expiry::process_expired_points(&self.store, &self.locks, now)
    }

    /// Queue expiring-soon warnings; see [`expiry::send_expiry_warnings`].
    pub fn send_expiry_warnings(&self, now: &TimeStamp<Utc>) -> Result<usize, LedgerError> {
        expiry::send_expiry_warnings(&self.store, now, self.config.warning_lookahead_days)
    }

    /// Deliver queued notifications through the dispatcher.
    pub fn drain_notifications(&self, notifier: &dyn Notifier) -> Result<usize, LedgerError> {
        notify::drain_outbox(&self.store, notifier)
    }
}
