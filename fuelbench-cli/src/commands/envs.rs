//! Environment commands: `envs`, `create-env`, `add-nodes`, `deploy`.

use super::Context;
use anyhow::Result;
use colored::Colorize;
use fuelbench_core::{EnvironmentRecord, EnvironmentRequest};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct EnvRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "MODE")]
    mode: String,
    #[tabled(rename = "RELEASE")]
    release: String,
    #[tabled(rename = "CHANGES")]
    changes: String,
}

impl From<EnvironmentRecord> for EnvRow {
    fn from(env: EnvironmentRecord) -> Self {
        Self {
            id: env.id,
            status: env.status,
            name: env.name,
            mode: env.mode,
            release: env.release_id.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            changes: env.changes.map(|c| c.join(", ")).unwrap_or_default(),
        }
    }
}

pub async fn envs(ctx: &Context) -> Result<()> {
    let envs = ctx.controller()?.list_environments().await?;

    if envs.is_empty() {
        println!("No environments");
        return Ok(());
    }

    let mut table = Table::new(envs.into_iter().map(EnvRow::from));
    table.with(Style::modern());
    println!("{}", table);
    Ok(())
}

pub async fn create(ctx: &Context, request: &EnvironmentRequest) -> Result<()> {
    let mut controller = ctx.controller()?;
    controller.check_master().await?;

    let (name, id) = controller.create_environment(request).await?;
    println!("{} Environment {} created with id {}", "✓".green().bold(), name.bold(), id);
    Ok(())
}

pub async fn add_nodes(ctx: &Context, env_id: u32, nodes: &[u32], roles: &[String]) -> Result<()> {
    let mut controller = ctx.controller()?;
    controller.check_master().await?;
    controller.select_environment(env_id).await?;
    controller.add_nodes(nodes, roles).await?;
    Ok(())
}

pub async fn deploy(ctx: &Context, env_id: u32) -> Result<()> {
    let mut controller = ctx.controller()?;
    controller.select_environment(env_id).await?;
    controller.deploy_changes().await?;
    Ok(())
}
