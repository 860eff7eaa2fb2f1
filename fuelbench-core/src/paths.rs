//! Centralized path configuration for fuelbench.
//!
//! Two roots exist: the per-operator data directory (sites, ISO scratch space,
//! logs) and the install tree shipping the helper scripts and default config.

use std::path::PathBuf;

/// Get the fuelbench data directory.
///
/// Resolution order:
/// 1. `FUELBENCH_DATA_DIR` environment variable
/// 2. `~/.fuelbench`
/// 3. `/var/lib/fuelbench` when no home directory can be determined
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FUELBENCH_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".fuelbench"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/fuelbench"))
}

/// Get the install tree root (scripts, guest helpers, default config).
///
/// Resolution order:
/// 1. `FUELBENCH_HOME` environment variable
/// 2. the directory two levels above the running executable
/// 3. `/usr/share/fuelbench`
pub fn install_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FUELBENCH_HOME") {
        return PathBuf::from(dir);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(|p| p.parent()).map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("/usr/share/fuelbench"))
}

/// Per-site working directories live here.
pub fn sites_dir() -> PathBuf {
    data_dir().join("sites")
}

/// Local working directory for one site.
pub fn site_dir(site: u32) -> PathBuf {
    sites_dir().join(site.to_string())
}

/// Scratch space for custom installer images.
pub fn image_dir() -> PathBuf {
    data_dir().join("iso")
}

/// Temporary extraction directory.
pub fn temp_dir() -> PathBuf {
    data_dir().join("tmp")
}

/// Get the logs directory.
pub fn logs_dir() -> PathBuf {
    data_dir().join("log")
}

/// Output of local external commands is appended here.
pub fn console_log() -> PathBuf {
    logs_dir().join("console.log")
}

/// Application log written by the tracing file layer.
pub fn app_log() -> PathBuf {
    logs_dir().join("fuelbench.log")
}

/// Host-side helper scripts.
pub fn scripts_dir() -> PathBuf {
    install_dir().join("scripts")
}

/// Scripts that are copied to and executed on the management node.
pub fn guest_dir() -> PathBuf {
    install_dir().join("guest")
}

/// Layered configuration file.
pub fn config_file() -> PathBuf {
    install_dir().join("conf").join("fuelbench.yaml")
}

/// Script that remasters the base ISO with site addressing.
pub fn make_iso_script() -> PathBuf {
    scripts_dir().join("make-custom-iso.sh")
}

/// Guest script enabling outbound network access on the management node.
pub fn enable_network_script() -> PathBuf {
    guest_dir().join("enable-vm-outbound-network.sh")
}

/// Guest script performing post-install console setup.
pub fn setup_master_script() -> PathBuf {
    guest_dir().join("setup-fuel-master.sh")
}

/// Create the data directories if missing.
pub fn ensure_data_dirs() -> std::io::Result<()> {
    for dir in [sites_dir(), image_dir(), temp_dir(), logs_dir()] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
