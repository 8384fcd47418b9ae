use serde::{Deserialize, Serialize};

use crate::ledger::{mul_div, Amount, Epoch, LedgerError};

/// Denominator of [`GrowthRate`].
pub const RATE_PRECISION: Amount = 1_000_000;

/// Raw stalk grown per raw seed per epoch, scaled by [`RATE_PRECISION`].
///
/// The default is one seed growing 1/10000 stalk per epoch. Seeds carry 6
/// decimals and stalk 10, so that is exactly one raw stalk unit per raw seed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct GrowthRate(Amount);

impl GrowthRate {
    pub const fn new(scaled: Amount) -> Self {
        Self(scaled)
    }

    pub const fn scaled(self) -> Amount {
        self.0
    }
}

impl Default for GrowthRate {
    fn default() -> Self {
        Self(RATE_PRECISION)
    }
}

/// Stalk grown by `seeds` since `deposit_epoch`.
pub fn grown_stalk(
    seeds: Amount,
    deposit_epoch: Epoch,
    current_epoch: Epoch,
    rate: GrowthRate,
) -> Result<Amount, LedgerError> {
    let elapsed = current_epoch
        .checked_sub(deposit_epoch)
        .ok_or(LedgerError::InvalidEpoch {
            deposit: deposit_epoch,
            current: current_epoch,
        })?;
    let seed_epochs = seeds
        .checked_mul(Amount::from(elapsed))
        .ok_or(LedgerError::Arithmetic("seed-epochs overflowed"))?;
    mul_div(seed_epochs, rate.scaled(), RATE_PRECISION)
}
