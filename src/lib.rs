pub mod balance;
pub mod error;
pub mod expiry;
pub mod notify;
pub mod redemption;
pub mod service;
pub mod spend;
pub mod store;
pub mod transaction;
pub mod utils;
pub mod vault;
