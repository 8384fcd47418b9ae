use serde::{Deserialize, Serialize};

use crate::assets::SiloAsset;
use crate::ledger::{Amount, Epoch, LedgerError, TokenValue, WithdrawalRecord};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalBucket {
    pub amount: TokenValue,
    pub records: Vec<WithdrawalRecord>,
}

impl WithdrawalBucket {
    fn empty(decimals: u8) -> Self {
        Self {
            amount: TokenValue::zero(decimals),
            records: Vec::new(),
        }
    }

    fn push(&mut self, record: WithdrawalRecord) -> Result<(), LedgerError> {
        self.amount = self.amount.checked_add(record.amount.raw)?;
        self.records.push(record);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalBuckets {
    /// Not yet claimable (`epoch > current_epoch`).
    pub locked: WithdrawalBucket,
    /// `epoch <= current_epoch`.
    pub claimable: WithdrawalBucket,
}

/// Splits pending withdrawals into locked and claimable. Records are never
/// split, and each raw amount is normalized to the asset's decimals.
pub fn classify_withdrawals(
    records: impl IntoIterator<Item = (Epoch, Amount)>,
    asset: &dyn SiloAsset,
    current_epoch: Epoch,
) -> Result<WithdrawalBuckets, LedgerError> {
    let decimals = asset.decimals();
    let mut buckets = WithdrawalBuckets {
        locked: WithdrawalBucket::empty(decimals),
        claimable: WithdrawalBucket::empty(decimals),
    };
    for (epoch, raw) in records {
        let record = WithdrawalRecord {
            epoch,
            amount: TokenValue::new(raw, decimals),
        };
        if epoch <= current_epoch {
            buckets.claimable.push(record)?;
        } else {
            buckets.locked.push(record)?;
        }
    }
    Ok(buckets)
}
