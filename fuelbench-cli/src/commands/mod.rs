//! CLI command implementations

pub mod envs;
pub mod master;
pub mod nodes;
pub mod reporter;

use anyhow::{Context as _, Result};
use fuelbench_core::{config, paths, BenchConfig, SiteController};
use reporter::ConsoleReporter;
use std::path::Path;
use std::sync::Arc;

/// Resolved per-invocation state shared by every command.
pub struct Context {
    pub site: u32,
    pub config: BenchConfig,
}

impl Context {
    /// Set up logging, data directories and configuration.
    pub fn init(site: u32, config_path: Option<&Path>, verbosity: u8) -> Result<Self> {
        paths::ensure_data_dirs().context("Failed to create data directories")?;
        fuelbench_core::init_observability(verbosity)?;

        let config = match config_path {
            Some(path) => BenchConfig::load(path, &config::current_user())?,
            None => BenchConfig::load_default()?,
        };
        tracing::debug!(site, "Configuration resolved");

        Ok(Self { site, config })
    }

    /// Controller for the selected site, wired to libvirt and the master over SSH.
    pub fn controller(&self) -> Result<SiteController> {
        let controller = SiteController::with_defaults(self.site, self.config.clone(), Arc::new(ConsoleReporter))?;
        Ok(controller)
    }
}
