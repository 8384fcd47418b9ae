use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assets::SiloAsset;
use crate::ledger::{
    add_amounts, mul_div, mul_pow10_div, unit, Amount, DepositCrate, Epoch, LedgerError,
};
use crate::silo::growth::{grown_stalk, GrowthRate};

/// A slice of a source crate. Value and seeds are scaled by the share of the
/// source amount taken, truncated at the asset's decimals.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedCrate {
    pub epoch: Epoch,
    pub amount: Amount,
    pub base_value: Amount,
    pub seeds: Amount,
    pub base_stalk: Amount,
    pub grown_stalk: Amount,
    pub stalk: Amount,
    /// Taken from a crate appended by the caller rather than from a deposit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub appended: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionResult {
    pub total_amount: Amount,
    pub total_value: Amount,
    pub total_stalk: Amount,
    pub total_seeds: Amount,
    pub crates: Vec<SelectedCrate>,
    /// Fingerprint of the snapshot the selection was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

/// Consumes `crates` in the given order until exactly `amount` is selected.
/// The last crate touched may be split.
pub fn pick_crates(
    crates: &[DepositCrate],
    amount: Amount,
    asset: &dyn SiloAsset,
    current_epoch: Epoch,
    rate: GrowthRate,
) -> Result<SelectionResult, LedgerError> {
    let mut result = SelectionResult::default();
    if amount == 0 {
        return Ok(result);
    }

    for source in crates {
        if source.amount == 0 {
            return Err(LedgerError::ZeroAmountCrate {
                epoch: source.epoch,
            });
        }
        let taken = (amount - result.total_amount).min(source.amount);
        let (base_value, seeds) = if taken == source.amount {
            (source.base_value, source.seeds)
        } else {
            let one = unit(asset.decimals())?;
            let share = mul_pow10_div(taken, u32::from(asset.decimals()), source.amount)?;
            (
                mul_div(share, source.base_value, one)?,
                mul_div(share, source.seeds, one)?,
            )
        };
        let base_stalk = asset.stalk_for_value(base_value)?;
        let grown = grown_stalk(seeds, source.epoch, current_epoch, rate)?;
        let stalk = add_amounts(base_stalk, grown)?;
        debug!(
            epoch = source.epoch,
            taken,
            split = taken < source.amount,
            stalk,
            "selected crate"
        );

        result.total_amount += taken;
        result.total_value = add_amounts(result.total_value, base_value)?;
        result.total_stalk = add_amounts(result.total_stalk, stalk)?;
        result.total_seeds = add_amounts(result.total_seeds, seeds)?;
        result.crates.push(SelectedCrate {
            epoch: source.epoch,
            amount: taken,
            base_value,
            seeds,
            base_stalk,
            grown_stalk: grown,
            stalk,
            appended: false,
        });

        if result.total_amount == amount {
            return Ok(result);
        }
    }

    warn!(
        asset = asset.id(),
        requested = amount,
        available = result.total_amount,
        "not enough deposits"
    );
    Err(LedgerError::InsufficientBalance {
        requested: amount,
        available: result.total_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::WhitelistedAsset;
    use proptest::prelude::*;

    fn deposit(epoch: Epoch, amount: Amount, base_value: Amount, seeds: Amount) -> DepositCrate {
        DepositCrate {
            epoch,
            amount,
            base_value,
            seeds,
        }
    }

    #[test]
    fn splits_single_crate_proportionally() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(10, 100, 100, 200)];
        let result = pick_crates(&crates, 60, &bean, 15, GrowthRate::default()).unwrap();

        assert_eq!(result.crates.len(), 1);
        let picked = &result.crates[0];
        assert_eq!(picked.epoch, 10);
        assert_eq!(picked.amount, 60);
        assert_eq!(picked.base_value, 60);
        assert_eq!(picked.seeds, 120);
        // 5 epochs elapsed
        assert_eq!(picked.grown_stalk, 120 * 5);
        assert_eq!(picked.base_stalk, 60 * 10_000);
        assert_eq!(picked.stalk, picked.base_stalk + picked.grown_stalk);
        assert_eq!(result.total_amount, 60);
        assert_eq!(result.total_value, 60);
        assert_eq!(result.total_seeds, 120);
    }

    #[test]
    fn consumes_whole_crates_in_given_order_before_splitting() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![
            deposit(20, 30, 30, 60),
            deposit(5, 50, 40, 80),
            deposit(12, 70, 70, 140),
        ];
        let result = pick_crates(&crates, 90, &bean, 20, GrowthRate::default()).unwrap();
        let picked: Vec<(Epoch, Amount)> =
            result.crates.iter().map(|c| (c.epoch, c.amount)).collect();
        assert_eq!(picked, vec![(20, 30), (5, 50), (12, 10)]);
        assert_eq!(result.total_amount, 90);
        // 10/70 truncates to 0.142857, so the slice is worth 9.99999 raw BDV
        assert_eq!(result.total_value, 30 + 40 + 9);
        assert_eq!(result.crates[2].seeds, 19);
    }

    #[test]
    fn split_share_is_truncated_before_scaling() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(4, 3_000_000, 3_000_000, 6_000_000)];
        let result = pick_crates(&crates, 1_000_000, &bean, 4, GrowthRate::default()).unwrap();
        // a third is 0.333333 at six decimals
        assert_eq!(result.crates[0].base_value, 999_999);
        assert_eq!(result.crates[0].seeds, 1_999_998);
        assert_eq!(result.total_value, 999_999);
    }

    #[test]
    fn lp_split_share_keeps_eighteen_decimals() {
        let lp = WhitelistedAsset::bean_3crv();
        // 3 LP tokens worth 3 BDV, take 1
        let crates = vec![deposit(4, 3_000_000_000_000_000_000, 3_000_000, 12_000_000)];
        let result =
            pick_crates(&crates, 1_000_000_000_000_000_000, &lp, 4, GrowthRate::default())
                .unwrap();
        assert_eq!(result.crates[0].base_value, 999_999);
        assert_eq!(result.crates[0].seeds, 3_999_999);
    }

    #[test]
    fn stops_at_exact_crate_boundary() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(1, 40, 40, 80), deposit(2, 60, 60, 120)];
        let result = pick_crates(&crates, 40, &bean, 3, GrowthRate::default()).unwrap();
        assert_eq!(result.crates.len(), 1);
    }

    #[test]
    fn zero_target_selects_nothing() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(1, 40, 40, 80)];
        let result = pick_crates(&crates, 0, &bean, 3, GrowthRate::default()).unwrap();
        assert!(result.crates.is_empty());
        assert_eq!(result.total_amount, 0);
    }

    #[test]
    fn insufficient_balance_returns_no_partial_selection() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(1, 40, 40, 80), deposit(2, 60, 60, 120)];
        let err = pick_crates(&crates, 101, &bean, 3, GrowthRate::default()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                requested: 101,
                available: 100
            }
        );
    }

    #[test]
    fn crate_from_the_future_is_rejected() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(9, 40, 40, 80)];
        let err = pick_crates(&crates, 10, &bean, 3, GrowthRate::default()).unwrap_err();
        assert_eq!(err, LedgerError::InvalidEpoch { deposit: 9, current: 3 });
    }

    #[test]
    fn zero_amount_crate_is_rejected() {
        let bean = WhitelistedAsset::bean();
        let crates = vec![deposit(1, 0, 0, 0), deposit(2, 60, 60, 120)];
        let err = pick_crates(&crates, 10, &bean, 3, GrowthRate::default()).unwrap_err();
        assert_eq!(err, LedgerError::ZeroAmountCrate { epoch: 1 });
    }

    fn crates_strategy() -> impl Strategy<Value = Vec<DepositCrate>> {
        proptest::collection::vec(
            (1u128..1_000_000_000, 1u128..1_000_000_000, 0u128..1_000_000_000),
            1..32,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(idx, (amount, value, seeds))| deposit(idx as Epoch, amount, value, seeds))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn selection_conserves_requested_amount(
            crates in crates_strategy(),
            share in 0u128..=1_000,
        ) {
            let bean = WhitelistedAsset::bean();
            let available: Amount = crates.iter().map(|c| c.amount).sum();
            let amount = available * share / 1_000;
            let result = pick_crates(&crates, amount, &bean, 64, GrowthRate::default()).unwrap();
            let picked: Amount = result.crates.iter().map(|c| c.amount).sum();
            prop_assert_eq!(picked, amount);
            prop_assert_eq!(result.total_amount, amount);
        }

        #[test]
        fn split_preserves_value_and_seed_ratios(
            amount in 1u128..1_000_000_000_000,
            value in 1u128..1_000_000_000_000,
            seeds in 0u128..1_000_000_000_000,
            share in 1u128..1_000,
        ) {
            let bean = WhitelistedAsset::bean();
            let source = deposit(0, amount, value, seeds);
            let taken = (amount * share / 1_000).max(1);
            let result = pick_crates(&[source], taken, &bean, 0, GrowthRate::default()).unwrap();
            let picked = &result.crates[0];
            let one = 1_000_000u128;
            // never more than the exact share; short by at most one unit of
            // share precision plus one raw unit
            prop_assert!(picked.base_value * amount <= taken * value);
            prop_assert!(taken * value * one < (picked.base_value + 1) * amount * one + value * amount);
            prop_assert!(picked.seeds * amount <= taken * seeds);
            prop_assert!(taken * seeds * one < (picked.seeds + 1) * amount * one + seeds * amount);
        }

        #[test]
        fn requesting_more_than_available_fails(
            crates in crates_strategy(),
            excess in 1u128..1_000,
        ) {
            let bean = WhitelistedAsset::bean();
            let available: Amount = crates.iter().map(|c| c.amount).sum();
            let err = pick_crates(&crates, available + excess, &bean, 64, GrowthRate::default())
                .unwrap_err();
            let is_insufficient = matches!(err, LedgerError::InsufficientBalance { .. });
            prop_assert!(is_insufficient);
        }
    }
}
