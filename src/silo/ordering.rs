use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ledger::{mul_pow10_div, Amount, DepositCrate, LedgerError, VALUE_DECIMALS};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// How crates are prioritized before selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "by", content = "direction", rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Keep the caller's order.
    AsGiven,
    Epoch(SortDirection),
    ValueDensity(SortDirection),
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        OrderingPolicy::Epoch(SortDirection::Descending)
    }
}

impl OrderingPolicy {
    /// `decimals` is the precision of the crates' asset amounts.
    pub fn apply(
        &self,
        crates: &[DepositCrate],
        decimals: u8,
    ) -> Result<Vec<DepositCrate>, LedgerError> {
        match self {
            OrderingPolicy::AsGiven => Ok(crates.to_vec()),
            OrderingPolicy::Epoch(direction) => Ok(order_by_epoch(crates, *direction)),
            OrderingPolicy::ValueDensity(direction) => {
                order_by_value_density(crates, *direction, decimals)
            }
        }
    }
}

impl FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "as-given" => Ok(OrderingPolicy::AsGiven),
            "epoch-asc" => Ok(OrderingPolicy::Epoch(SortDirection::Ascending)),
            "epoch-desc" => Ok(OrderingPolicy::Epoch(SortDirection::Descending)),
            "density-asc" => Ok(OrderingPolicy::ValueDensity(SortDirection::Ascending)),
            "density-desc" => Ok(OrderingPolicy::ValueDensity(SortDirection::Descending)),
            other => Err(format!(
                "unknown ordering {other}, expected one of as-given, epoch-asc, epoch-desc, density-asc, density-desc"
            )),
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderingPolicy::AsGiven => "as-given",
            OrderingPolicy::Epoch(SortDirection::Ascending) => "epoch-asc",
            OrderingPolicy::Epoch(SortDirection::Descending) => "epoch-desc",
            OrderingPolicy::ValueDensity(SortDirection::Ascending) => "density-asc",
            OrderingPolicy::ValueDensity(SortDirection::Descending) => "density-desc",
        };
        f.write_str(name)
    }
}

/// BDV per whole token, truncated at the finer of the BDV precision and the
/// asset's `decimals`. The result is raw at that precision.
pub fn value_density(deposit: &DepositCrate, decimals: u8) -> Result<Amount, LedgerError> {
    if deposit.amount == 0 {
        return Err(LedgerError::ZeroAmountCrate {
            epoch: deposit.epoch,
        });
    }
    let precision = decimals.max(VALUE_DECIMALS);
    // value / 10^6 divided by amount / 10^decimals, scaled by 10^precision
    let exponent = u32::from(decimals) + u32::from(precision) - u32::from(VALUE_DECIMALS);
    mul_pow10_div(deposit.base_value, exponent, deposit.amount)
}

pub fn order_by_epoch(crates: &[DepositCrate], direction: SortDirection) -> Vec<DepositCrate> {
    let mut ordered = crates.to_vec();
    match direction {
        SortDirection::Ascending => ordered.sort_by(|a, b| a.epoch.cmp(&b.epoch)),
        SortDirection::Descending => ordered.sort_by(|a, b| b.epoch.cmp(&a.epoch)),
    }
    ordered
}

/// Stable sort by value density. Crates with equal truncated density keep
/// their input order.
pub fn order_by_value_density(
    crates: &[DepositCrate],
    direction: SortDirection,
    decimals: u8,
) -> Result<Vec<DepositCrate>, LedgerError> {
    let mut keyed = crates
        .iter()
        .map(|c| value_density(c, decimals).map(|density| (density, c.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    match direction {
        SortDirection::Ascending => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
        SortDirection::Descending => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
    }
    Ok(keyed.into_iter().map(|(_, c)| c).collect())
}
