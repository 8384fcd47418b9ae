use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assets::{AssetRegistry, SiloAsset};
use crate::config::ProtocolConfig;
use crate::ledger::{
    add_amounts, signed_delta, Amount, AssetId, DepositCrate, Epoch, LedgerError, SignedAmount,
    SiloSnapshot,
};
use crate::silo::growth::{grown_stalk, GrowthRate};
use crate::silo::ordering::OrderingPolicy;
use crate::silo::select::{pick_crates, SelectionResult};

/// What the destination side receives for the converted amount.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationQuote {
    /// Raw amount of the destination asset.
    pub amount: Amount,
    /// BDV of that amount.
    pub value: Amount,
}

/// Prices the destination leg of a conversion. Whether the conversion is
/// allowed at all is decided before the engine is invoked.
#[cfg_attr(test, mockall::automock)]
pub trait DestinationPricer {
    fn quote(&self, from: &str, to: &str, amount_in: Amount)
        -> Result<DestinationQuote, LedgerError>;
}

/// A quote fixed up front, e.g. one already obtained from the pricing service.
#[derive(Clone, Copy, Debug)]
pub struct FixedQuote(pub DestinationQuote);

impl DestinationPricer for FixedQuote {
    fn quote(
        &self,
        _from: &str,
        _to: &str,
        _amount_in: Amount,
    ) -> Result<DestinationQuote, LedgerError> {
        Ok(self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ConvertRequest<'a> {
    pub amount: Amount,
    pub crates: &'a [DepositCrate],
    pub current_epoch: Epoch,
    pub order: OrderingPolicy,
    /// Appended after ordering, without re-sorting.
    pub appended: Option<DepositCrate>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionResult {
    pub from: AssetId,
    pub to: AssetId,
    pub amount: Amount,
    pub delta_value: SignedAmount,
    pub delta_stalk: SignedAmount,
    pub delta_seeds: SignedAmount,
    /// The burn leg: source crates and their totals.
    pub consumed: SelectionResult,
    pub minted_crate: DepositCrate,
    pub minted_stalk: Amount,
}

/// Computes the full effect of converting `request.amount` of `from` into `to`.
pub fn convert_crates(
    from: &dyn SiloAsset,
    to: &dyn SiloAsset,
    request: &ConvertRequest<'_>,
    rate: GrowthRate,
    pricer: &dyn DestinationPricer,
) -> Result<ConversionResult, LedgerError> {
    if request.amount == 0 {
        return Err(LedgerError::ZeroAmount);
    }
    let mut ordered = request.order.apply(request.crates, from.decimals())?;
    if let Some(extra) = &request.appended {
        ordered.push(extra.clone());
    }
    let mut consumed = pick_crates(&ordered, request.amount, from, request.current_epoch, rate)?;
    // the appended crate is last, so it is only reached once every deposit is used
    if request.appended.is_some() && consumed.crates.len() == ordered.len() {
        if let Some(slice) = consumed.crates.last_mut() {
            slice.appended = true;
        }
    }

    let quote = pricer.quote(from.id(), to.id(), request.amount)?;
    if quote.amount == 0 || quote.value == 0 {
        return Err(LedgerError::ZeroAmountCrate {
            epoch: request.current_epoch,
        });
    }
    let minted_crate = DepositCrate {
        epoch: request.current_epoch,
        amount: quote.amount,
        base_value: quote.value,
        seeds: to.seeds_for_value(quote.value)?,
    };
    let minted_stalk = add_amounts(
        to.stalk_for_value(minted_crate.base_value)?,
        grown_stalk(
            minted_crate.seeds,
            minted_crate.epoch,
            request.current_epoch,
            rate,
        )?,
    )?;

    let result = ConversionResult {
        from: from.id().to_string(),
        to: to.id().to_string(),
        amount: request.amount,
        delta_value: signed_delta(minted_crate.base_value, consumed.total_value)?,
        delta_stalk: signed_delta(minted_stalk, consumed.total_stalk)?,
        delta_seeds: signed_delta(minted_crate.seeds, consumed.total_seeds)?,
        consumed,
        minted_crate,
        minted_stalk,
    };
    info!(
        from = %result.from,
        to = %result.to,
        amount = result.amount,
        crates = result.consumed.crates.len(),
        delta_stalk = result.delta_stalk,
        delta_seeds = result.delta_seeds,
        "computed conversion"
    );
    Ok(result)
}

/// Resolves assets and the pathway's ordering from configuration, then runs
/// [`convert_crates`] over a depositor snapshot.
pub struct ConversionEngine<'a, P: DestinationPricer> {
    registry: &'a AssetRegistry,
    config: &'a ProtocolConfig,
    pricer: &'a P,
}

impl<'a, P: DestinationPricer> ConversionEngine<'a, P> {
    pub fn new(registry: &'a AssetRegistry, config: &'a ProtocolConfig, pricer: &'a P) -> Self {
        Self {
            registry,
            config,
            pricer,
        }
    }

    pub fn convert(
        &self,
        snapshot: &SiloSnapshot,
        to: &str,
        amount: Amount,
        current_epoch: Epoch,
        appended: Option<DepositCrate>,
    ) -> Result<ConversionResult, LedgerError> {
        let from_asset = self.registry.get(&snapshot.asset)?;
        let to_asset = self.registry.get(to)?;
        let order = self.config.ordering_for(self.registry, &snapshot.asset, to)?;
        let request = ConvertRequest {
            amount,
            crates: &snapshot.deposits,
            current_epoch,
            order,
            appended,
        };
        let mut result = convert_crates(
            from_asset,
            to_asset,
            &request,
            self.config.stalk_per_seed_per_epoch,
            self.pricer,
        )?;
        result.consumed.snapshot = Some(snapshot.fingerprint_hex());
        Ok(result)
    }
}
