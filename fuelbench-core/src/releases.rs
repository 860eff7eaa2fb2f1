//! Supported management console versions and the releases each can deploy.

use crate::error::{BenchError, Result};

/// A release deployable to workload nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub name: &'static str,
    /// Release id as known to the console.
    pub id: u32,
    /// `virt-install --os-variant` hint for workload nodes.
    pub os_variant: &'static str,
}

/// Metadata for one console version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleRelease {
    pub version: &'static str,
    /// `--os-variant` hint for the management node.
    pub master_os: &'static str,
    pub releases: &'static [Release],
}

impl ConsoleRelease {
    /// Look up a release by name.
    pub fn release(&self, name: &str) -> Result<&Release> {
        self.releases.iter().find(|r| r.name == name).ok_or_else(|| {
            BenchError::validation(format!(
                "Release '{}' is not available for fuel version {}",
                name, self.version
            ))
        })
    }
}

// ubuntu uses rhel hints to work around libvirt bug 1147662
static TABLE: &[ConsoleRelease] = &[
    ConsoleRelease {
        version: "6.0",
        master_os: "centos6.5",
        releases: &[
            Release { name: "centos", id: 1, os_variant: "centos6.5" },
            Release { name: "ubuntu", id: 2, os_variant: "rhel6.5" },
        ],
    },
    ConsoleRelease {
        version: "6.1",
        master_os: "centos6.5",
        releases: &[
            Release { name: "centos", id: 1, os_variant: "centos6.5" },
            Release { name: "ubuntu", id: 2, os_variant: "rhel7.0" },
        ],
    },
    ConsoleRelease {
        version: "7.0",
        master_os: "centos6.5",
        releases: &[Release { name: "ubuntu", id: 2, os_variant: "rhel7.0" }],
    },
];

/// Metadata for a console version. Unmapped versions are a validation failure.
pub fn lookup(version: &str) -> Result<&'static ConsoleRelease> {
    TABLE
        .iter()
        .find(|r| r.version == version)
        .ok_or_else(|| BenchError::validation(format!("Unsupported fuel version: {}", version)))
}

/// All supported console versions.
pub fn supported_versions() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|r| r.version)
}
