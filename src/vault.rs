//! Vault items: creator-published rewards redeemable for FamPoints.
use super::error::LedgerError;
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub struct VaultItem {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with an item_ prefix
    #[n(1)]
    pub creator_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub point_cost: i64,
    #[n(4)]
    pub supply_limit: Option<u32>, // None means unlimited
    #[n(5)]
    pub per_user_limit: Option<u32>,
    #[n(6)]
    pub active: bool,
    #[n(7)]
    pub claimed: u32, // running count of live claims against supply
}

impl VaultItem {
    pub fn new(
        creator_id: &str,
        title: &str,
        point_cost: i64,
        supply_limit: Option<u32>,
        per_user_limit: Option<u32>,
    ) -> Result<Self, LedgerError> {
        if creator_id.is_empty() {
            return Err(LedgerError::InvalidArgument("creator_id is empty".into()));
        }
        if title.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "vault item title is empty".into(),
            ));
        }
        if point_cost < 1 {
            return Err(LedgerError::InvalidArgument(format!(
                "point_cost must be at least 1, got {point_cost}"
            )));
        }

        Ok(Self {
            id: utils::new_item_id(),
            creator_id: creator_id.into(),
            title: title.into(),
            point_cost,
            supply_limit,
            per_user_limit,
            active: true,
            claimed: 0,
        })
    }

    /// Limits may only be relaxed once published: raised, or lifted to
    /// unlimited. Tightening would strand claims already in flight.
    pub fn relax_limits(
        &mut self,
        supply_limit: Option<u32>,
        per_user_limit: Option<u32>,
    ) -> Result<(), LedgerError> {
        if tightens(self.supply_limit, supply_limit) {
            return Err(LedgerError::InvalidState(format!(
                "supply limit on '{}' can only be raised or removed",
                self.title
            )));
        }
        if tightens(self.per_user_limit, per_user_limit) {
            return Err(LedgerError::InvalidState(format!(
                "per-user limit on '{}' can only be raised or removed",
                self.title
            )));
        }

        self.supply_limit = supply_limit;
        self.per_user_limit = per_user_limit;
        Ok(())
    }

    /// Whether a fan with `claimed_by_user` live claims may redeem this item.
    pub fn available_for(&self, claimed_by_user: u32) -> bool {
        self.active
            && self.supply_limit.is_none_or(|limit| self.claimed < limit)
            && self
                .per_user_limit
                .is_none_or(|limit| claimed_by_user < limit)
    }
}

fn tightens(current: Option<u32>, proposed: Option<u32>) -> bool {
    match (current, proposed) {
        (_, None) => false, // lifting to unlimited always allowed
        (None, Some(_)) => true,
        (Some(current), Some(proposed)) => proposed < current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_item_encoding() {
        let original = VaultItem::new("creator_a", "Backstage pass", 500, Some(10), Some(1)).unwrap();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: VaultItem = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn limits_only_relax() {
        let mut item = VaultItem::new("creator_a", "Print", 100, Some(5), Some(2)).unwrap();

        assert!(item.relax_limits(Some(3), Some(2)).is_err());
        assert!(item.relax_limits(Some(5), Some(1)).is_err());
        assert!(item.relax_limits(Some(10), None).is_ok());
        // once unlimited, reintroducing a cap is a tighten
        assert!(item.relax_limits(None, Some(4)).is_err());
    }

    #[test]
    fn availability_respects_limits() {
        let mut item = VaultItem::new("creator_a", "Print", 100, Some(2), Some(1)).unwrap();

        assert!(item.available_for(0));
        assert!(!item.available_for(1)); // per-user cap hit

        item.claimed = 2;
        assert!(!item.available_for(0)); // supply exhausted

        item.active = false;
        item.claimed = 0;
        assert!(!item.available_for(0));
    }
}
