//! fuelbench core library
//!
//! Provisioning and orchestration for virtual OpenStack lab sites: a
//! management node built from a customized installer image, PXE-booted
//! workload nodes, and the console-side environment configuration that ties
//! them together.

pub mod access;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod image;
pub mod observability;
pub mod parser;
pub mod paths;
pub mod pipeline;
pub mod poll;
pub mod provider;
pub mod releases;
pub mod remote;
pub mod site;

// Re-export commonly used items
pub use access::AccessInfo;
pub use config::{BenchConfig, MasterOverrides, NodeProfile, SlaveOverrides};
pub use controller::{Collaborators, EnvironmentRequest, SiteController, SiteLayout};
pub use error::{BenchError, Result};
pub use image::{ImageBuilder, ImageRequest, ScriptImageBuilder};
pub use observability::{init as init_observability, LogReporter, StepReporter, StepStatus};
pub use parser::{EnvironmentRecord, NodeRecord};
pub use poll::{poll_until, PollSpec};
pub use provider::{BootMode, VirshProvider, VirtProvider, VmInstallSpec};
pub use remote::tasks::NetworkMode;
pub use remote::{ExecOutput, RemoteChannel, RemoteShell, SshShell, Visibility};
pub use site::{NetworkPlan, NetworkSpec, Site};
