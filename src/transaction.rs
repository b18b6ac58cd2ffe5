//! Core ledger entry types for the FamPoints point ledger
use super::error::LedgerError;
use crate::utils;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Credits earn an expiry clock of this many days unless overridden.
pub const DEFAULT_EXPIRY_DAYS: i64 = 60;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone, Copy)]
pub enum TransactionKind {
    #[n(0)]
    Earned,
    #[n(1)]
    Spent,
    #[n(2)]
    Refund,
    #[n(3)]
    Expired,
    #[n(4)]
    Bonus,
}

impl TransactionKind {
    /// Credit kinds add to a balance and carry an expiry clock.
    /// Spent and Expired rows are compensating debits.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionKind::Earned | TransactionKind::Refund | TransactionKind::Bonus
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }
    /// Whole days from `self` until `later`, truncated towards zero.
    pub fn days_until(&self, later: &TimeStamp<Utc>) -> i64 {
        (later.0 - self.0).num_days()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One entry in a (user, creator) point ledger. Append-only in intent:
/// after creation only the `used`/`expired` flags flip, or `amount`
/// shrinks in place when a spend splits the record.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub struct PointTransaction {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with a txn_ prefix
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub creator_id: String,
    #[n(3)]
    pub amount: i64, // signed: credits positive, debits negative
    #[n(4)]
    pub kind: TransactionKind,
    #[n(5)]
    pub payment_ref: Option<String>,
    #[n(6)]
    pub redemption_ref: Option<String>,
    #[n(7)]
    pub description: String,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub expires_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub expired: bool,
    #[n(11)]
    pub used: bool,
    #[n(12)]
    pub related: Vec<String>, // split lineage and compensating-entry references
}

impl PointTransaction {
    /// Construct a ledger entry. The sign of `amount` must match `kind`:
    /// credit kinds are positive, Spent/Expired are negative. Credit kinds
    /// pick up the default 60-day expiry clock; debits never expire.
    pub fn new(
        user_id: &str,
        creator_id: &str,
        amount: i64,
        kind: TransactionKind,
        created_at: TimeStamp<Utc>,
    ) -> Result<Self, LedgerError> {
        if user_id.is_empty() {
            return Err(LedgerError::InvalidArgument("user_id is empty".into()));
        }
        if creator_id.is_empty() {
            return Err(LedgerError::InvalidArgument("creator_id is empty".into()));
        }
        if amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "transaction amount is zero".into(),
            ));
        }
        if kind.is_credit() && amount < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "{kind:?} transaction must carry a positive amount, got {amount}"
            )));
        }
        if !kind.is_credit() && amount > 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "{kind:?} transaction must carry a negative amount, got {amount}"
            )));
        }

        let expires_at = kind
            .is_credit()
            .then(|| created_at.plus_days(DEFAULT_EXPIRY_DAYS));

        Ok(Self {
            id: utils::new_txn_id(),
            user_id: user_id.into(),
            creator_id: creator_id.into(),
            amount,
            kind,
            payment_ref: None,
            redemption_ref: None,
            description: String::new(),
            created_at,
            expires_at,
            expired: false,
            used: false,
            related: vec![],
        })
    }
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }
    pub fn with_payment_ref(mut self, payment_ref: &str) -> Self {
        self.payment_ref = Some(payment_ref.into());
        self
    }
    pub fn with_redemption_ref(mut self, redemption_ref: &str) -> Self {
        self.redemption_ref = Some(redemption_ref.into());
        self
    }
    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }
    /// Override the default expiry clock.
    pub fn expires_at(mut self, expires_at: TimeStamp<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
    /// Suspend expiry entirely (promotional grants and the like).
    pub fn never_expires(mut self) -> Self {
        self.expires_at = None;
        self
    }
    /// A record qualifies for spending when it is an unused, unexpired
    /// credit whose expiry clock has not yet run out.
    pub fn is_spendable(&self, now: &TimeStamp<Utc>) -> bool {
        self.kind.is_credit()
            && !self.used
            && !self.expired
            && match &self.expires_at {
                None => true,
                Some(at) => at > now,
            }
    }
}
