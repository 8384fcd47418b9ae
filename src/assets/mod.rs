use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{mul_div, Amount, AssetId, LedgerError};
use crate::silo::ordering::{OrderingPolicy, SortDirection};

/// Raw stalk units (10 decimals) issued per raw BDV unit (6 decimals) when the
/// asset issues one stalk per BDV.
pub const STALK_PER_VALUE_UNIT: Amount = 10_000;

/// Per-asset accounting capabilities. The selection and conversion code only
/// ever talks to an asset through this trait.
pub trait SiloAsset {
    fn id(&self) -> &str;

    fn decimals(&self) -> u8;

    /// Seeds (6 decimals) attached to a deposit worth `value` BDV.
    fn seeds_for_value(&self, value: Amount) -> Result<Amount, LedgerError>;

    /// Base stalk (10 decimals) issued for `value` BDV.
    fn stalk_for_value(&self, value: Amount) -> Result<Amount, LedgerError>;
}

/// A whitelisted silo asset whose stalk and seeds scale linearly with BDV.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhitelistedAsset {
    pub id: AssetId,
    pub decimals: u8,
    /// Raw stalk per raw BDV unit.
    pub stalk_per_value: Amount,
    /// Raw seeds per raw BDV unit.
    pub seeds_per_value: Amount,
    /// Crate ordering used when converting out of this asset and no explicit
    /// pathway is configured.
    #[serde(default)]
    pub default_order: OrderingPolicy,
}

impl WhitelistedAsset {
    pub fn bean() -> Self {
        Self {
            id: "BEAN".into(),
            decimals: 6,
            stalk_per_value: STALK_PER_VALUE_UNIT,
            seeds_per_value: 2,
            default_order: OrderingPolicy::Epoch(SortDirection::Descending),
        }
    }

    pub fn bean_3crv() -> Self {
        Self {
            id: "BEAN:3CRV".into(),
            decimals: 18,
            stalk_per_value: STALK_PER_VALUE_UNIT,
            seeds_per_value: 4,
            default_order: OrderingPolicy::ValueDensity(SortDirection::Ascending),
        }
    }

    pub fn unripe_bean() -> Self {
        Self {
            id: "urBEAN".into(),
            decimals: 6,
            stalk_per_value: STALK_PER_VALUE_UNIT,
            seeds_per_value: 2,
            default_order: OrderingPolicy::Epoch(SortDirection::Descending),
        }
    }

    pub fn unripe_bean_3crv() -> Self {
        Self {
            id: "urBEAN:3CRV".into(),
            decimals: 6,
            stalk_per_value: STALK_PER_VALUE_UNIT,
            seeds_per_value: 4,
            default_order: OrderingPolicy::ValueDensity(SortDirection::Ascending),
        }
    }

    pub fn default_whitelist() -> Vec<Self> {
        vec![
            Self::bean(),
            Self::bean_3crv(),
            Self::unripe_bean(),
            Self::unripe_bean_3crv(),
        ]
    }
}

impl SiloAsset for WhitelistedAsset {
    fn id(&self) -> &str {
        &self.id
    }

    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn seeds_for_value(&self, value: Amount) -> Result<Amount, LedgerError> {
        mul_div(value, self.seeds_per_value, 1)
    }

    fn stalk_for_value(&self, value: Amount) -> Result<Amount, LedgerError> {
        mul_div(value, self.stalk_per_value, 1)
    }
}

#[derive(Clone, Debug, Default)]
pub struct AssetRegistry {
    assets: BTreeMap<AssetId, WhitelistedAsset>,
}

impl AssetRegistry {
    pub fn new(assets: impl IntoIterator<Item = WhitelistedAsset>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|asset| (asset.id.clone(), asset))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&WhitelistedAsset, LedgerError> {
        self.assets
            .get(id)
            .ok_or_else(|| LedgerError::InvalidAsset {
                asset: id.to_string(),
            })
    }

    pub fn ids(&self) -> Vec<AssetId> {
        self.assets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bean_issues_one_stalk_and_two_seeds_per_bdv() {
        let bean = WhitelistedAsset::bean();
        assert_eq!(bean.stalk_for_value(1_000_000).unwrap(), 10_000_000_000);
        assert_eq!(bean.seeds_for_value(1_000_000).unwrap(), 2_000_000);
    }

    #[test]
    fn registry_rejects_unknown_assets() {
        let registry = AssetRegistry::new(WhitelistedAsset::default_whitelist());
        assert_eq!(registry.get("BEAN:3CRV").unwrap().decimals, 18);
        assert_eq!(
            registry.get("DOGE").unwrap_err(),
            LedgerError::InvalidAsset {
                asset: "DOGE".into()
            }
        );
        assert_eq!(registry.ids().len(), 4);
    }

    #[test]
    fn asset_config_reads_from_json() {
        let asset: WhitelistedAsset = serde_json::from_str(
            r#"{"id":"BEAN:ETH","decimals":18,"stalk_per_value":10000,"seeds_per_value":3}"#,
        )
        .unwrap();
        assert_eq!(asset.default_order, OrderingPolicy::default());
        assert_eq!(asset.seeds_for_value(10).unwrap(), 30);
    }
}
