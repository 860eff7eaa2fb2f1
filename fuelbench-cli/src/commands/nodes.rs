//! Slave node and VM commands.

use super::Context;
use anyhow::Result;
use colored::Colorize;
use fuelbench_core::{site, NodeProfile, NodeRecord, SlaveOverrides};
use tabled::{settings::Style, Table, Tabled};

/// Create `count` slave nodes. Explicit sizing wins over the profile's.
pub async fn create_slaves(
    ctx: &Context,
    count: u32,
    profile: Option<NodeProfile>,
    release: Option<&str>,
    sizing: SlaveOverrides,
) -> Result<()> {
    let mut controller = ctx.controller()?;
    controller.check_master().await?;
    if let Some(release) = release {
        controller.set_release(release)?;
    }

    let base = profile.map(|p| ctx.config.slave_profile(p)).unwrap_or_default();
    let overrides = SlaveOverrides {
        cpu: sizing.cpu.or(base.cpu),
        ram: sizing.ram.or(base.ram),
        disk: sizing.disk.or(base.disk),
    };

    for _ in 0..count {
        let name = controller.create_slave(&overrides).await?;
        println!("{} {}", "✓".green().bold(), name);
    }
    Ok(())
}

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ROLE")]
    role: &'static str,
}

pub async fn vms(ctx: &Context) -> Result<()> {
    let controller = ctx.controller()?;
    let vms = controller.list_vms().await?;

    if vms.is_empty() {
        println!("No VMs on site {}", ctx.site);
        return Ok(());
    }

    let rows: Vec<VmRow> = vms
        .into_iter()
        .map(|name| {
            let role = if site::is_master(&name) { "master" } else { "slave" };
            VmRow { name, role }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    let networks = controller.list_networks().await?;
    if !networks.is_empty() {
        println!("Networks: {}", networks.join(", "));
    }
    Ok(())
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ENV")]
    cluster: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "ROLES")]
    roles: String,
    #[tabled(rename = "ONLINE")]
    online: String,
}

impl From<NodeRecord> for NodeRow {
    fn from(node: NodeRecord) -> Self {
        let mut roles: Vec<String> = node.roles.into_iter().collect();
        roles.extend(node.pending_roles.into_iter().map(|r| format!("{} (pending)", r)));

        Self {
            id: node.id,
            status: node.status,
            name: node.name,
            cluster: node.cluster.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            ip: node.ip,
            mac: node.mac,
            roles: roles.join(", "),
            online: match node.online {
                Some(true) => "yes".green().to_string(),
                Some(false) => "no".red().to_string(),
                None => "-".to_string(),
            },
        }
    }
}

pub async fn nodes(ctx: &Context, pending: bool) -> Result<()> {
    let controller = ctx.controller()?;
    let nodes = if pending { controller.pending_nodes().await? } else { controller.list_nodes().await? };

    if nodes.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    let mut table = Table::new(nodes.into_iter().map(NodeRow::from));
    table.with(Style::modern());
    println!("{}", table);
    Ok(())
}
