//! silo - plan withdrawals, conversions and claims over a depositor snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use silo_ledger::ledger::{
    Amount, Epoch, SiloSnapshot, TokenValue, SEED_DECIMALS, STALK_DECIMALS, VALUE_DECIMALS,
};
use silo_ledger::silo::convert::{
    ConversionEngine, ConversionResult, DestinationQuote, FixedQuote,
};
use silo_ledger::silo::growth::grown_stalk;
use silo_ledger::silo::ordering::OrderingPolicy;
use silo_ledger::silo::select::SelectionResult;
use silo_ledger::{ProtocolConfig, SiloAsset};

#[derive(Parser)]
#[command(name = "silo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Protocol config file (JSON); built-in whitelist when absent
    #[arg(short, long, global = true, env = "SILO_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Human,
}

#[derive(Serialize)]
struct GrownOutput {
    grown_stalk: Amount,
}

#[derive(Serialize)]
struct WithdrawOutput<'a> {
    plan: &'a SelectionResult,
    snapshot: &'a SiloSnapshot,
}

#[derive(Serialize)]
struct ConvertOutput<'a> {
    conversion: &'a ConversionResult,
    snapshot: &'a SiloSnapshot,
}

#[derive(Serialize)]
struct ClaimOutput<'a> {
    claimed: Amount,
    snapshot: &'a SiloSnapshot,
}

#[derive(Subcommand)]
enum Commands {
    /// Stalk grown by raw seeds between two epochs
    Grown {
        #[arg(long)]
        seeds: Amount,
        #[arg(long)]
        deposit_epoch: Epoch,
        #[arg(long)]
        current_epoch: Epoch,
    },

    /// Deposited, locked and claimable balances of a snapshot
    Balance {
        snapshot: PathBuf,
        #[arg(short, long)]
        epoch: Epoch,
    },

    /// Select crates for a raw amount without changing anything
    Pick {
        snapshot: PathBuf,
        #[arg(short, long)]
        amount: Amount,
        #[arg(short, long)]
        epoch: Epoch,
        /// as-given, epoch-asc, epoch-desc, density-asc, density-desc
        #[arg(short, long, default_value_t = OrderingPolicy::default())]
        order: OrderingPolicy,
    },

    /// Plan a withdrawal and print the snapshot it leaves behind
    Withdraw {
        snapshot: PathBuf,
        #[arg(short, long)]
        amount: Amount,
        #[arg(short, long)]
        epoch: Epoch,
        #[arg(long, default_value_t = OrderingPolicy::default())]
        order: OrderingPolicy,
        /// Write the resulting snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Plan a conversion into another whitelisted asset
    Convert {
        snapshot: PathBuf,
        /// Destination asset id
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        amount: Amount,
        #[arg(short, long)]
        epoch: Epoch,
        /// Quoted raw amount of the destination asset
        #[arg(long)]
        amount_out: Amount,
        /// Quoted BDV of the destination amount
        #[arg(long)]
        value_out: Amount,
        /// Write the remaining source snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Remove claimable withdrawals
    Claim {
        snapshot: PathBuf,
        #[arg(short, long)]
        epoch: Epoch,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ProtocolConfig::load(path)?,
        None => ProtocolConfig::default(),
    };
    let registry = config.registry();
    let format = cli.format;

    match cli.command {
        Commands::Grown {
            seeds,
            deposit_epoch,
            current_epoch,
        } => {
            let grown = grown_stalk(
                seeds,
                deposit_epoch,
                current_epoch,
                config.stalk_per_seed_per_epoch,
            )?;
            emit(format, &GrownOutput { grown_stalk: grown }, || {
                format!(
                    "{} seeds grew {} stalk over {} epochs",
                    TokenValue::new(seeds, SEED_DECIMALS),
                    TokenValue::new(grown, STALK_DECIMALS),
                    current_epoch - deposit_epoch
                )
            })
        }

        Commands::Balance { snapshot, epoch } => {
            let snapshot = read_snapshot(&snapshot)?;
            let asset = registry.get(&snapshot.asset)?;
            let balance = snapshot.balance(asset, epoch)?;
            emit(format, &balance, || {
                format!(
                    "{}: deposited {} ({} BDV, {} crates), locked {}, claimable {}",
                    asset.id(),
                    balance.deposited.amount,
                    balance.deposited.value,
                    balance.deposited.crates.len(),
                    balance.locked.amount,
                    balance.claimable.amount
                )
            })
        }

        Commands::Pick {
            snapshot,
            amount,
            epoch,
            order,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let asset = registry.get(&snapshot.asset)?;
            let plan =
                snapshot.pick(asset, amount, epoch, config.stalk_per_seed_per_epoch, order)?;
            emit(format, &plan, || {
                let mut lines = vec![format!(
                    "{} {} from {} crates: {} BDV, {} stalk",
                    TokenValue::new(plan.total_amount, asset.decimals()),
                    asset.id(),
                    plan.crates.len(),
                    TokenValue::new(plan.total_value, VALUE_DECIMALS),
                    TokenValue::new(plan.total_stalk, STALK_DECIMALS)
                )];
                for c in &plan.crates {
                    lines.push(format!(
                        "  epoch {:>8}  {}",
                        c.epoch,
                        TokenValue::new(c.amount, asset.decimals())
                    ));
                }
                lines.join("\n")
            })
        }

        Commands::Withdraw {
            snapshot,
            amount,
            epoch,
            order,
            out,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let asset = registry.get(&snapshot.asset)?;
            let plan =
                snapshot.pick(asset, amount, epoch, config.stalk_per_seed_per_epoch, order)?;
            let next = snapshot.apply_withdrawal(&plan, epoch, config.withdraw_freeze_epochs)?;
            if let Some(out) = &out {
                write_json(out, &next)?;
            }
            info!(asset = asset.id(), amount, crates = plan.crates.len(), "planned withdrawal");
            let output = WithdrawOutput {
                plan: &plan,
                snapshot: &next,
            };
            emit(format, &output, || {
                format!(
                    "withdraw {} {} from {} crates, forfeiting {} stalk; claimable at epoch {}",
                    TokenValue::new(plan.total_amount, asset.decimals()),
                    asset.id(),
                    plan.crates.len(),
                    TokenValue::new(plan.total_stalk, STALK_DECIMALS),
                    epoch.saturating_add(config.withdraw_freeze_epochs)
                )
            })
        }

        Commands::Convert {
            snapshot,
            to,
            amount,
            epoch,
            amount_out,
            value_out,
            out,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let pricer = FixedQuote(DestinationQuote {
                amount: amount_out,
                value: value_out,
            });
            let engine = ConversionEngine::new(&registry, &config, &pricer);
            let result = engine.convert(&snapshot, &to, amount, epoch, None)?;
            let remaining = snapshot.apply_conversion(&result)?;
            if let Some(out) = &out {
                write_json(out, &remaining)?;
            }
            let output = ConvertOutput {
                conversion: &result,
                snapshot: &remaining,
            };
            emit(format, &output, || {
                format!(
                    "convert {} -> {}: {} crates burned, delta {} BDV, {} stalk, {} seeds",
                    result.from,
                    result.to,
                    result.consumed.crates.len(),
                    result.delta_value,
                    result.delta_stalk,
                    result.delta_seeds
                )
            })
        }

        Commands::Claim {
            snapshot,
            epoch,
            out,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let asset = registry.get(&snapshot.asset)?;
            let (next, claimed) = snapshot.claim(epoch)?;
            if let Some(out) = &out {
                write_json(out, &next)?;
            }
            let output = ClaimOutput {
                claimed,
                snapshot: &next,
            };
            emit(format, &output, || {
                format!(
                    "claimed {} {}",
                    TokenValue::new(claimed, asset.decimals()),
                    asset.id()
                )
            })
        }
    }
}

fn read_snapshot(path: &Path) -> Result<SiloSnapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid snapshot {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn emit<T: Serialize>(format: Format, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Human => println!("{}", human()),
    }
    Ok(())
}
