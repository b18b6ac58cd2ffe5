//! Identifier helpers. Every record id is a uuid7 encoded with bech32
//! under a human-readable prefix, so ids are self-describing in logs.

use bech32::{Bech32m, Hrp};
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// uuid7 payloads are a fixed 16 bytes, so encoding under a known-good
// prefix cannot fail at runtime.
fn new_id(hrp: Hrp) -> String {
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .expect("bech32 encoding of a uuid payload cannot fail")
}

pub fn new_user_id() -> String {
    new_id(Hrp::parse_unchecked("user_"))
}

pub fn new_creator_id() -> String {
    new_id(Hrp::parse_unchecked("creator_"))
}

pub fn new_txn_id() -> String {
    new_id(Hrp::parse_unchecked("txn_"))
}

pub fn new_redemption_id() -> String {
    new_id(Hrp::parse_unchecked("rdm_"))
}

pub fn new_item_id() -> String {
    new_id(Hrp::parse_unchecked("item_"))
}

pub fn new_audit_id() -> String {
    new_id(Hrp::parse_unchecked("audit_"))
}
