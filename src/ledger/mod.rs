use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::assets::SiloAsset;
use crate::silo::convert::ConversionResult;
use crate::silo::growth::{grown_stalk, GrowthRate};
use crate::silo::ordering::OrderingPolicy;
use crate::silo::select::{pick_crates, SelectedCrate, SelectionResult};
use crate::silo::withdrawals::{classify_withdrawals, WithdrawalBucket};

pub type AssetId = String;
pub type Epoch = u32;
pub type Amount = u128;
pub type SignedAmount = i128;

pub const VALUE_DECIMALS: u8 = 6; // BDV
pub const SEED_DECIMALS: u8 = 6;
pub const STALK_DECIMALS: u8 = 10;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },
    #[error("unknown asset {asset}")]
    InvalidAsset { asset: AssetId },
    #[error("current epoch {current} precedes deposit epoch {deposit}")]
    InvalidEpoch { deposit: Epoch, current: Epoch },
    #[error("crate at epoch {epoch} has zero amount")]
    ZeroAmountCrate { epoch: Epoch },
    #[error("requested amount must be greater than zero")]
    ZeroAmount,
    #[error("no deposit crate at epoch {epoch}")]
    UnknownCrate { epoch: Epoch },
    #[error("plan was computed against snapshot {expected}, current snapshot is {actual}")]
    StaleSnapshot { expected: String, actual: String },
    #[error("plan does not record the snapshot it was computed from")]
    UnboundPlan,
    #[error("more than one deposit crate at epoch {epoch}")]
    DuplicateCrate { epoch: Epoch },
    #[error("arithmetic error: {0}")]
    Arithmetic(&'static str),
}

/// Multiplies then divides, truncating toward zero.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Result<Amount, LedgerError> {
    if denominator == 0 {
        return Err(LedgerError::Arithmetic("division by zero"));
    }
    a.checked_mul(b)
        .map(|product| product / denominator)
        .ok_or(LedgerError::Arithmetic("fixed-point product overflowed"))
}

/// `a * 10^exponent / denominator`, truncated toward zero. Falls back to
/// digit-by-digit long division when the scaled numerator does not fit.
pub fn mul_pow10_div(
    a: Amount,
    exponent: u32,
    denominator: Amount,
) -> Result<Amount, LedgerError> {
    if denominator == 0 {
        return Err(LedgerError::Arithmetic("division by zero"));
    }
    if let Some(product) = 10u128
        .checked_pow(exponent)
        .and_then(|scale| a.checked_mul(scale))
    {
        return Ok(product / denominator);
    }
    let mut quotient = a / denominator;
    let mut remainder = a % denominator;
    for _ in 0..exponent {
        let shifted = remainder
            .checked_mul(10)
            .ok_or(LedgerError::Arithmetic("scaled quotient overflowed"))?;
        quotient = quotient
            .checked_mul(10)
            .and_then(|q| q.checked_add(shifted / denominator))
            .ok_or(LedgerError::Arithmetic("scaled quotient overflowed"))?;
        remainder = shifted % denominator;
    }
    Ok(quotient)
}

/// One whole unit of a token with `decimals` decimals, in raw units.
pub fn unit(decimals: u8) -> Result<Amount, LedgerError> {
    10u128
        .checked_pow(u32::from(decimals))
        .ok_or(LedgerError::Arithmetic("token decimals out of range"))
}

pub fn add_amounts(a: Amount, b: Amount) -> Result<Amount, LedgerError> {
    a.checked_add(b)
        .ok_or(LedgerError::Arithmetic("amount sum overflowed"))
}

/// `after - before` as a signed quantity.
pub fn signed_delta(after: Amount, before: Amount) -> Result<SignedAmount, LedgerError> {
    let after = SignedAmount::try_from(after)
        .map_err(|_| LedgerError::Arithmetic("amount exceeds signed range"))?;
    let before = SignedAmount::try_from(before)
        .map_err(|_| LedgerError::Arithmetic("amount exceeds signed range"))?;
    after
        .checked_sub(before)
        .ok_or(LedgerError::Arithmetic("signed delta overflowed"))
}

/// A raw on-chain quantity tagged with the precision it is expressed in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenValue {
    pub raw: Amount,
    pub decimals: u8,
}

impl TokenValue {
    pub fn new(raw: Amount, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(0, decimals)
    }

    pub fn checked_add(self, raw: Amount) -> Result<Self, LedgerError> {
        Ok(Self::new(add_amounts(self.raw, raw)?, self.decimals))
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = match 10u128.checked_pow(u32::from(self.decimals)) {
            Some(scale) if self.decimals > 0 => scale,
            _ => return write!(f, "{}", self.raw),
        };
        let whole = self.raw / scale;
        let frac = self.raw % scale;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let frac = format!("{:0width$}", frac, width = self.decimals as usize);
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

/// One deposit position. Stalk is always derived, never stored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositCrate {
    pub epoch: Epoch,
    pub amount: Amount,
    pub base_value: Amount,
    pub seeds: Amount,
}

impl DepositCrate {
    pub fn base_stalk(&self, asset: &dyn SiloAsset) -> Result<Amount, LedgerError> {
        asset.stalk_for_value(self.base_value)
    }

    pub fn stalk(
        &self,
        asset: &dyn SiloAsset,
        current_epoch: Epoch,
        rate: GrowthRate,
    ) -> Result<Amount, LedgerError> {
        let grown = grown_stalk(self.seeds, self.epoch, current_epoch, rate)?;
        add_amounts(self.base_stalk(asset)?, grown)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRecord {
    pub epoch: Epoch,
    pub amount: TokenValue,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositedBalance {
    pub amount: TokenValue,
    pub value: TokenValue,
    pub crates: Vec<DepositCrate>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiloBalance {
    pub deposited: DepositedBalance,
    pub locked: WithdrawalBucket,
    pub claimable: WithdrawalBucket,
}

/// Everything one depositor holds of one asset, as fetched from the
/// authoritative ledger. Never mutated; applying a plan yields a new snapshot.
///
/// Deposit epochs are unique; deserialization rejects a snapshot that
/// repeats one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "SnapshotRecord")]
pub struct SiloSnapshot {
    pub asset: AssetId,
    #[serde(default)]
    pub deposits: Vec<DepositCrate>,
    #[serde(default)]
    pub withdrawals: BTreeMap<Epoch, Amount>,
}

#[derive(Deserialize)]
struct SnapshotRecord {
    asset: AssetId,
    #[serde(default)]
    deposits: Vec<DepositCrate>,
    #[serde(default)]
    withdrawals: BTreeMap<Epoch, Amount>,
}

impl TryFrom<SnapshotRecord> for SiloSnapshot {
    type Error = LedgerError;

    fn try_from(record: SnapshotRecord) -> Result<Self, Self::Error> {
        let snapshot = SiloSnapshot {
            asset: record.asset,
            deposits: record.deposits,
            withdrawals: record.withdrawals,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl SiloSnapshot {
    pub fn new(asset: impl Into<AssetId>) -> Self {
        Self {
            asset: asset.into(),
            deposits: Vec::new(),
            withdrawals: BTreeMap::new(),
        }
    }

    /// Fails on the first deposit epoch that appears twice.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut seen = BTreeSet::new();
        for deposit in &self.deposits {
            if !seen.insert(deposit.epoch) {
                return Err(LedgerError::DuplicateCrate {
                    epoch: deposit.epoch,
                });
            }
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        compute_snapshot_root(self)
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }

    pub fn balance(
        &self,
        asset: &dyn SiloAsset,
        current_epoch: Epoch,
    ) -> Result<SiloBalance, LedgerError> {
        self.ensure_asset(asset)?;
        let mut amount = TokenValue::zero(asset.decimals());
        let mut value = TokenValue::zero(VALUE_DECIMALS);
        for deposit in &self.deposits {
            amount = amount.checked_add(deposit.amount)?;
            value = value.checked_add(deposit.base_value)?;
        }
        let buckets = classify_withdrawals(
            self.withdrawals.iter().map(|(epoch, amount)| (*epoch, *amount)),
            asset,
            current_epoch,
        )?;
        Ok(SiloBalance {
            deposited: DepositedBalance {
                amount,
                value,
                crates: self.deposits.clone(),
            },
            locked: buckets.locked,
            claimable: buckets.claimable,
        })
    }

    /// Orders the deposits by `order` and selects crates for `amount`. The
    /// result records this snapshot's fingerprint.
    pub fn pick(
        &self,
        asset: &dyn SiloAsset,
        amount: Amount,
        current_epoch: Epoch,
        rate: GrowthRate,
        order: OrderingPolicy,
    ) -> Result<SelectionResult, LedgerError> {
        self.ensure_asset(asset)?;
        let ordered = order.apply(&self.deposits, asset.decimals())?;
        let mut selection = pick_crates(&ordered, amount, asset, current_epoch, rate)?;
        selection.snapshot = Some(self.fingerprint_hex());
        Ok(selection)
    }

    /// Removes the plan's crates from the deposits and queues the withdrawn
    /// amount to become claimable `freeze_epochs` after `current_epoch`. An
    /// empty plan leaves the withdrawals untouched.
    pub fn apply_withdrawal(
        &self,
        plan: &SelectionResult,
        current_epoch: Epoch,
        freeze_epochs: Epoch,
    ) -> Result<SiloSnapshot, LedgerError> {
        self.ensure_fresh(plan.snapshot.as_deref())?;
        let mut next = self.clone();
        next.remove_selected(&plan.crates)?;
        let claimable_at = current_epoch
            .checked_add(freeze_epochs)
            .ok_or(LedgerError::Arithmetic("withdrawal epoch overflowed"))?;
        if plan.total_amount == 0 {
            return Ok(next);
        }
        let pending = next.withdrawals.entry(claimable_at).or_insert(0);
        *pending = add_amounts(*pending, plan.total_amount)?;
        debug!(
            asset = %self.asset,
            amount = plan.total_amount,
            claimable_at,
            "applied withdrawal plan"
        );
        Ok(next)
    }

    /// Removes the crates a conversion burned. Slices of an appended crate
    /// were never deposited and are skipped. The minted crate belongs to the
    /// destination asset's snapshot, see [`SiloSnapshot::deposit`].
    pub fn apply_conversion(&self, result: &ConversionResult) -> Result<SiloSnapshot, LedgerError> {
        if result.from != self.asset {
            return Err(LedgerError::InvalidAsset {
                asset: result.from.clone(),
            });
        }
        self.ensure_fresh(result.consumed.snapshot.as_deref())?;
        let mut next = self.clone();
        next.remove_selected(&result.consumed.crates)?;
        Ok(next)
    }

    /// Adds a crate, merging it into an existing crate of the same epoch.
    pub fn deposit(&self, deposit: DepositCrate) -> Result<SiloSnapshot, LedgerError> {
        if deposit.amount == 0 {
            return Err(LedgerError::ZeroAmountCrate {
                epoch: deposit.epoch,
            });
        }
        let mut next = self.clone();
        match next.deposits.iter_mut().find(|c| c.epoch == deposit.epoch) {
            Some(existing) => {
                existing.amount = add_amounts(existing.amount, deposit.amount)?;
                existing.base_value = add_amounts(existing.base_value, deposit.base_value)?;
                existing.seeds = add_amounts(existing.seeds, deposit.seeds)?;
            }
            None => next.deposits.push(deposit),
        }
        Ok(next)
    }

    /// Drops every claimable withdrawal and returns the claimed raw total.
    pub fn claim(&self, current_epoch: Epoch) -> Result<(SiloSnapshot, Amount), LedgerError> {
        let mut next = self.clone();
        let mut claimed = 0;
        for (_, amount) in self.withdrawals.range(..=current_epoch) {
            claimed = add_amounts(claimed, *amount)?;
        }
        next.withdrawals.retain(|epoch, _| *epoch > current_epoch);
        Ok((next, claimed))
    }

    fn ensure_asset(&self, asset: &dyn SiloAsset) -> Result<(), LedgerError> {
        if asset.id() != self.asset {
            return Err(LedgerError::InvalidAsset {
                asset: asset.id().to_string(),
            });
        }
        Ok(())
    }

    fn ensure_fresh(&self, expected: Option<&str>) -> Result<(), LedgerError> {
        let expected = expected.ok_or(LedgerError::UnboundPlan)?;
        let actual = self.fingerprint_hex();
        if expected != actual {
            warn!(asset = %self.asset, %expected, %actual, "plan does not match snapshot");
            return Err(LedgerError::StaleSnapshot {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    fn remove_selected(&mut self, selected: &[SelectedCrate]) -> Result<(), LedgerError> {
        self.validate()?;
        for slice in selected.iter().filter(|slice| !slice.appended) {
            let idx = self
                .deposits
                .iter()
                .position(|c| c.epoch == slice.epoch)
                .ok_or(LedgerError::UnknownCrate { epoch: slice.epoch })?;
            let source = &mut self.deposits[idx];
            if slice.amount > source.amount {
                return Err(LedgerError::InsufficientBalance {
                    requested: slice.amount,
                    available: source.amount,
                });
            }
            if slice.amount == source.amount {
                self.deposits.remove(idx);
                continue;
            }
            source.amount -= slice.amount;
            source.base_value = source.base_value.saturating_sub(slice.base_value);
            source.seeds = source.seeds.saturating_sub(slice.seeds);
        }
        Ok(())
    }
}

fn compute_snapshot_root(snapshot: &SiloSnapshot) -> [u8; 32] {
    let mut deposits: Vec<&DepositCrate> = snapshot.deposits.iter().collect();
    deposits.sort_by_key(|c| c.epoch);

    let mut leaves: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    hasher.update(b"asset");
    hasher.update(snapshot.asset.as_bytes());
    leaves.push(hasher.finalize().into());
    for deposit in deposits {
        let mut hasher = Sha256::new();
        hasher.update(b"deposit");
        hasher.update(deposit.epoch.to_le_bytes());
        hasher.update(deposit.amount.to_le_bytes());
        hasher.update(deposit.base_value.to_le_bytes());
        hasher.update(deposit.seeds.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (epoch, amount) in &snapshot.withdrawals {
        let mut hasher = Sha256::new();
        hasher.update(b"withdrawal");
        hasher.update(epoch.to_le_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
