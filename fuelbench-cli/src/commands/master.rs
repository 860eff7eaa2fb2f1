//! Master node commands: `create-master`, `wait`, `info`.

use super::Context;
use anyhow::Result;
use colored::Colorize;
use fuelbench_core::{access, MasterOverrides};
use std::path::PathBuf;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

pub async fn create(ctx: &Context, iso: Option<PathBuf>, overrides: &MasterOverrides) -> Result<()> {
    let iso = iso.unwrap_or_else(|| PathBuf::from(&ctx.config.default_iso));
    let mut controller = ctx.controller()?;

    let release = controller.check_image(&iso).await?;
    println!("Installer image {} (Fuel {})", iso.display(), release.version.bold());

    controller.create_master(overrides).await?;
    println!("{} Fuel master of site {} is ready", "✓".green().bold(), ctx.site);
    Ok(())
}

pub async fn wait(ctx: &Context, console: bool, timeout: Option<u64>) -> Result<()> {
    let controller = ctx.controller()?;
    let config = controller.config();

    if console {
        let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| config.readiness_timeout());
        controller.wait_for_console(timeout).await?;
    } else {
        let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| config.operational_timeout());
        controller.wait_for_master(timeout).await?;
    }
    Ok(())
}

#[derive(Tabled)]
struct AccessRow {
    #[tabled(rename = "ENDPOINT")]
    endpoint: &'static str,
    #[tabled(rename = "ADDRESS")]
    address: String,
}

pub async fn info(ctx: &Context) -> Result<()> {
    let mut controller = ctx.controller()?;
    // Version decides the VIP and dashboard scheme; fall back to defaults when the master is down.
    if let Err(e) = controller.check_master().await {
        eprintln!("{} could not read the Fuel version: {}", "warning:".yellow().bold(), e);
    }

    let host = access::primary_address()
        .await
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let info = controller.access_info(&host);

    let rows = vec![
        AccessRow { endpoint: "Fuel master", address: info.master_ip },
        AccessRow { endpoint: "Fuel web UI", address: info.console_url },
        AccessRow { endpoint: "Public VIP", address: info.public_vip },
        AccessRow { endpoint: "Horizon", address: info.dashboard_url },
        AccessRow { endpoint: "External Fuel web UI", address: info.external_console_url },
        AccessRow { endpoint: "External SSH", address: format!("ssh -p {} {}", info.ssh_port, info.ssh_host) },
        AccessRow { endpoint: "External Horizon", address: info.external_dashboard_url },
    ];

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);
    Ok(())
}
