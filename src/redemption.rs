//! Redemption records: a fan's claim against a Vault reward.
use super::error::LedgerError;
use super::transaction::TimeStamp;
use crate::utils;
use chrono::Utc;

/// A Pending redemption is auto-cancelled after this many days.
pub const DEFAULT_TIMEOUT_DAYS: i64 = 60;

/// The closed status set. Pending is the only non-terminal state; a
/// redemption leaves it exactly once. Cancelled covers the automatic
/// timeout path, Rejected the explicit creator decision; both refund.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone, Copy)]
pub enum RedemptionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Fulfilled,
    #[n(2)]
    Rejected,
    #[n(3)]
    Cancelled,
}

impl RedemptionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RedemptionStatus::Pending)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub struct Redemption {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with an rdm_ prefix
    #[n(1)]
    pub fan_id: String,
    #[n(2)]
    pub creator_id: String,
    #[n(3)]
    pub item_id: String,
    #[n(4)]
    pub item_title: String, // snapshot, so history survives item edits
    #[n(5)]
    pub points_spent: i64, // fixed at creation, never changes
    #[n(6)]
    pub fan_input: Option<String>,
    #[n(7)]
    pub creator_response: Option<String>,
    #[n(8)]
    pub status: RedemptionStatus,
    #[n(9)]
    pub redeemed_at: TimeStamp<Utc>,
    #[n(10)]
    pub fulfilled_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub resolved_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub expires_at: TimeStamp<Utc>, // auto-cancel deadline
}

impl Redemption {
    pub fn new(
        fan_id: &str,
        creator_id: &str,
        item_id: &str,
        item_title: &str,
        points_spent: i64,
        fan_input: Option<String>,
        redeemed_at: TimeStamp<Utc>,
        timeout_days: i64,
    ) -> Result<Self, LedgerError> {
        if fan_id.is_empty() || creator_id.is_empty() || item_id.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "redemption requires fan, creator and item ids".into(),
            ));
        }
        if points_spent < 1 {
            return Err(LedgerError::InvalidArgument(format!(
                "points_spent must be at least 1, got {points_spent}"
            )));
        }

        let expires_at = redeemed_at.plus_days(timeout_days);

        Ok(Self {
            id: utils::new_redemption_id(),
            fan_id: fan_id.into(),
            creator_id: creator_id.into(),
            item_id: item_id.into(),
            item_title: item_title.into(),
            points_spent,
            fan_input,
            creator_response: None,
            status: RedemptionStatus::Pending,
            redeemed_at,
            fulfilled_at: None,
            resolved_at: None,
            expires_at,
        })
    }
}
