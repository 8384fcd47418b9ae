//! Protocol parameters: growth rate, withdrawal freeze, the asset whitelist and
//! per-pathway crate ordering.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assets::{AssetRegistry, WhitelistedAsset};
use crate::ledger::{AssetId, Epoch, LedgerError};
use crate::silo::growth::GrowthRate;
use crate::silo::ordering::OrderingPolicy;

pub const DEFAULT_WITHDRAW_FREEZE_EPOCHS: Epoch = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("asset {0} is whitelisted twice")]
    DuplicateAsset(AssetId),
    #[error("conversion pathway references unknown asset {0}")]
    UnknownPathwayAsset(AssetId),
}

/// Explicit crate ordering for converting `from` into `to`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertPathway {
    pub from: AssetId,
    pub to: AssetId,
    pub order: OrderingPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub stalk_per_seed_per_epoch: GrowthRate,
    #[serde(default = "default_withdraw_freeze_epochs")]
    pub withdraw_freeze_epochs: Epoch,
    #[serde(default = "WhitelistedAsset::default_whitelist")]
    pub assets: Vec<WhitelistedAsset>,
    #[serde(default)]
    pub pathways: Vec<ConvertPathway>,
}

fn default_withdraw_freeze_epochs() -> Epoch {
    DEFAULT_WITHDRAW_FREEZE_EPOCHS
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            stalk_per_seed_per_epoch: GrowthRate::default(),
            withdraw_freeze_epochs: DEFAULT_WITHDRAW_FREEZE_EPOCHS,
            assets: WhitelistedAsset::default_whitelist(),
            pathways: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ProtocolConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        debug!(
            path = %path.display(),
            assets = config.assets.len(),
            pathways = config.pathways.len(),
            "loaded protocol config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.id.as_str()) {
                return Err(ConfigError::DuplicateAsset(asset.id.clone()));
            }
        }
        for pathway in &self.pathways {
            for id in [&pathway.from, &pathway.to] {
                if !seen.contains(id.as_str()) {
                    return Err(ConfigError::UnknownPathwayAsset(id.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> AssetRegistry {
        AssetRegistry::new(self.assets.iter().cloned())
    }

    /// The explicit pathway ordering if one is configured, otherwise the
    /// source asset's default.
    pub fn ordering_for(
        &self,
        registry: &AssetRegistry,
        from: &str,
        to: &str,
    ) -> Result<OrderingPolicy, LedgerError> {
        if let Some(pathway) = self
            .pathways
            .iter()
            .find(|p| p.from == from && p.to == to)
        {
            return Ok(pathway.order);
        }
        Ok(registry.get(from)?.default_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silo::ordering::SortDirection;

    #[test]
    fn empty_json_yields_defaults() {
        let config: ProtocolConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ProtocolConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn pathway_overrides_asset_default() {
        let config: ProtocolConfig = serde_json::from_str(
            r#"{
                "withdraw_freeze_epochs": 2,
                "pathways": [
                    {"from": "BEAN", "to": "BEAN:3CRV", "order": {"by": "epoch", "direction": "ascending"}}
                ]
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        let registry = config.registry();
        assert_eq!(config.withdraw_freeze_epochs, 2);
        assert_eq!(
            config.ordering_for(&registry, "BEAN", "BEAN:3CRV").unwrap(),
            OrderingPolicy::Epoch(SortDirection::Ascending)
        );
        assert_eq!(
            config.ordering_for(&registry, "BEAN:3CRV", "BEAN").unwrap(),
            OrderingPolicy::ValueDensity(SortDirection::Ascending)
        );
        assert!(config.ordering_for(&registry, "DOGE", "BEAN").is_err());
    }

    #[test]
    fn duplicate_assets_and_dangling_pathways_fail_validation() {
        let mut config = ProtocolConfig::default();
        config.assets.push(WhitelistedAsset::bean());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAsset(id)) if id == "BEAN"
        ));

        let mut config = ProtocolConfig::default();
        config.pathways.push(ConvertPathway {
            from: "BEAN".into(),
            to: "BEAN:ETH".into(),
            order: OrderingPolicy::AsGiven,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownPathwayAsset(id)) if id == "BEAN:ETH"
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ProtocolConfig::load(Path::new("/nonexistent/silo.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
