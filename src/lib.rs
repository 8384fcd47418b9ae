//! Deposit crate accounting for a reserve protocol silo.
//!
//! A depositor's position in one asset is a list of crates, one per deposit
//! epoch. This crate answers the questions every silo action needs answered
//! before it can be submitted:
//!
//! * [`silo::growth`]: how much stalk a crate's seeds have grown.
//! * [`silo::ordering`]: which crates should be consumed first.
//! * [`silo::select`]: which crates (whole or split) make up a requested
//!   amount.
//! * [`silo::withdrawals`]: which withdrawals are still locked and which can
//!   be claimed.
//! * [`silo::convert`]: what a conversion burns, what it mints, and the
//!   resulting change in value, stalk and seeds.
//!
//! Everything is computed over an explicit [`ledger::SiloSnapshot`] and the
//! current epoch. The result is a plan; submitting it is someone else's job.

pub mod assets;
pub mod config;
pub mod ledger;
pub mod silo;

pub use assets::{AssetRegistry, SiloAsset, WhitelistedAsset};
pub use config::{ConfigError, ProtocolConfig};
pub use ledger::{Amount, DepositCrate, Epoch, LedgerError, SiloSnapshot};
