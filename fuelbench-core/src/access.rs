//! How operators reach a site from outside the lab host.

use crate::config::{render_port, BenchConfig};
use crate::site::Site;
use serde::Serialize;
use std::net::IpAddr;

/// Web console port on the management node.
pub const CONSOLE_PORT: u16 = 8000;

/// Access summary for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessInfo {
    pub master_ip: String,
    pub console_url: String,
    pub public_vip: String,
    pub dashboard_url: String,
    pub external_console_url: String,
    pub ssh_host: String,
    pub ssh_port: String,
    pub external_dashboard_url: String,
}

impl AccessInfo {
    /// Build the summary for `site` as seen from `host_ip`.
    ///
    /// External ports depend on whether the management node's public
    /// interface was left disabled; the dashboard link scheme on the version.
    pub fn new(site: &Site, config: &BenchConfig, host_ip: &str) -> Self {
        let port = |template: &str| render_port(template, site.id);

        let (web_port, ssh_port) = if site.disable_master_public {
            (port(&config.fuelweb_adm_mapped_port), port(&config.fuelssh_adm_mapped_port))
        } else {
            (port(&config.fuelweb_pub_mapped_port), port(&config.fuelssh_pub_mapped_port))
        };

        let external_dashboard_url = if site.version == "7.0" {
            format!("https://{}:{}/horizon/", host_ip, port(&config.horissl_gt7_mapped_port))
        } else {
            format!("http://{}:{}/horizon/", host_ip, port(&config.horiweb_lt7_mapped_port))
        };

        Self {
            master_ip: site.plan.master_ip.clone(),
            console_url: format!("http://{}:{}/", site.plan.master_ip, CONSOLE_PORT),
            public_vip: site.plan.public_vip.clone(),
            dashboard_url: format!("http://{}/", site.plan.public_vip),
            external_console_url: format!("http://{}:{}/", host_ip, web_port),
            ssh_host: host_ip.to_string(),
            ssh_port,
            external_dashboard_url,
        }
    }
}

/// First non-loopback IPv4 address of this host, by asking the kernel which
/// source address it would route an outbound datagram from. Nothing is sent.
pub async fn primary_address() -> Option<IpAddr> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("192.0.2.1:9").await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn site(version: &str, disable_public: bool) -> Site {
        let config = BenchConfig::default();
        let mut site = Site::new(7, PathBuf::from("/tmp/site7"), &config).unwrap();
        site.set_version(version.to_string(), &config);
        site.disable_master_public = disable_public;
        site
    }

    #[test]
    fn test_public_interface_ports() {
        let info = AccessInfo::new(&site("6.1", false), &BenchConfig::default(), "192.168.1.10");
        assert_eq!(info.master_ip, "10.20.7.2");
        assert_eq!(info.console_url, "http://10.20.7.2:8000/");
        assert_eq!(info.external_console_url, "http://192.168.1.10:18907/");
        assert_eq!(info.ssh_port, "12307");
        assert_eq!(info.external_dashboard_url, "http://192.168.1.10:18007/horizon/");
    }

    #[test]
    fn test_admin_ports_when_public_disabled() {
        let info = AccessInfo::new(&site("6.1", true), &BenchConfig::default(), "h");
        assert_eq!(info.external_console_url, "http://h:18807/");
        assert_eq!(info.ssh_port, "12207");
    }

    #[test]
    fn test_dashboard_tls_on_newer_console() {
        let info = AccessInfo::new(&site("7.0", false), &BenchConfig::default(), "h");
        assert_eq!(info.public_vip, "172.16.7.4");
        assert_eq!(info.dashboard_url, "http://172.16.7.4/");
        assert_eq!(info.external_dashboard_url, "https://h:18507/horizon/");
    }
}
