//! avd-build CLI
//!
//! Builds per-host device configurations for a fabric group out of an
//! Ansible-style YAML inventory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use avdbuild_builder::EosBuilder;
use avdbuild_core::{match_pattern, Inventory, VaultSecrets};
use avdbuild_runtime::{BuildEngine, BuildOptions};

/// Build fabric device configurations from an inventory
#[derive(Parser)]
#[command(name = "avd-build")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the inventory file
    #[arg(short = 'i', long)]
    inventory_path: PathBuf,

    /// Path to the output directory
    #[arg(short = 'o', long, default_value = "intended")]
    config_output_path: PathBuf,

    /// If provided, fabric facts will be written to this path
    #[arg(long)]
    avd_facts_path: Option<PathBuf>,

    /// Name of the fabric group
    #[arg(short = 'f', long)]
    fabric_group_name: String,

    /// Limit filter for the inventory (host patterns with `:`/`,`, `!`, `&`
    /// and globs). Defaults to the fabric group name
    #[arg(short = 'l', long)]
    limit: Option<String>,

    /// Maximum number of parallel workers
    #[arg(short = 'm', long, default_value_t = default_workers())]
    max_workers: usize,

    /// Use strict mode and fail if there are validation errors
    #[arg(long)]
    strict: bool,

    /// Vault ID used to decrypt the inventory, as label@passwordfile.
    /// Multiple vault IDs can be provided
    #[arg(long = "vault-id", num_args = 0..)]
    vault_id: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(4)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let configs_path = cli.config_output_path.join("configs");
    let structured_configs_path = cli.config_output_path.join("structured_configs");
    let limit = cli
        .limit
        .clone()
        .unwrap_or_else(|| cli.fabric_group_name.clone());

    tracing::debug!("avd-build version: {}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("inventory_path: {}", cli.inventory_path.display());
    tracing::debug!("configs_path: {}", configs_path.display());
    tracing::debug!(
        "structured_configs_path: {}",
        structured_configs_path.display()
    );
    tracing::debug!("avd_facts_path: {:?}", cli.avd_facts_path);
    tracing::debug!("fabric_group_name: {}", cli.fabric_group_name);
    tracing::debug!("limit: {limit}");
    tracing::debug!("max_workers: {}", cli.max_workers);
    tracing::debug!("strict: {}", cli.strict);
    tracing::debug!("vault_ids: {:?}", cli.vault_id);

    let secrets =
        VaultSecrets::from_vault_ids(&cli.vault_id).context("Failed to set up vault secrets")?;

    let inventory =
        Inventory::load(&cli.inventory_path, &secrets).context("Failed to load inventory")?;

    let start = Instant::now();
    let fabric_hostvars = inventory
        .hostvars_in(&cli.fabric_group_name)
        .context("Failed to resolve fabric host variables")?;
    tracing::debug!("Load inputs time: {:.3}s", start.elapsed().as_secs_f64());

    let target_hosts =
        match_pattern(&inventory, &limit).context("Failed to resolve limit pattern")?;
    if target_hosts.is_empty() {
        bail!("No hosts matched pattern={limit}");
    }
    if !target_hosts
        .iter()
        .any(|host| fabric_hostvars.contains_key(host))
    {
        bail!(
            "No hosts from group {} selected with pattern={limit}",
            cli.fabric_group_name
        );
    }

    let engine = BuildEngine::new(
        Arc::new(EosBuilder::new()),
        BuildOptions {
            configs_path,
            structured_configs_path,
            avd_facts_path: cli.avd_facts_path.clone(),
            max_workers: cli.max_workers,
            strict: cli.strict,
        },
    );

    let report = engine.build(fabric_hostvars, &target_hosts).await?;

    tracing::info!(
        "Built {} host configurations ({} skipped)",
        report.built.len(),
        report.skipped.len()
    );
    Ok(())
}
