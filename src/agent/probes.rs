use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::error::Result;

/// The three inventory domains, in their fixed collection order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Hardware,
    Network,
    Software,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Hardware => "hardware",
            Domain::Network => "network",
            Domain::Software => "software",
        }
    }
}

/// One cycle's worth of collected inventory: probe-domain to opaque payload.
/// A `BTreeMap` keeps the domains in collection order when serialized.
pub type CollectionResult = BTreeMap<Domain, Value>;

/// A data-collection collaborator for a single domain. Implementations run
/// on a blocking worker and must stay within the loop's per-probe timeout.
pub trait Probe: Send + Sync {
    fn domain(&self) -> Domain;
    fn collect(&self) -> Result<Value>;
}

/// The stock collaborators, in collection order.
pub fn default_probes() -> Vec<std::sync::Arc<dyn Probe>> {
    vec![
        std::sync::Arc::new(HardwareProbe),
        std::sync::Arc::new(NetworkProbe),
        std::sync::Arc::new(SoftwareProbe),
    ]
}

pub struct HardwareProbe;

impl Probe for HardwareProbe {
    fn domain(&self) -> Domain {
        Domain::Hardware
    }

    fn collect(&self) -> Result<Value> {
        let sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );
        let cpu_brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_default();

        let disks: Vec<Value> = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|d| {
                json!({
                    "name": d.name().to_string_lossy(),
                    "filesystem": d.file_system().to_string_lossy(),
                    "mount_point": d.mount_point().to_string_lossy(),
                    "total_bytes": d.total_space(),
                    "available_bytes": d.available_space(),
                })
            })
            .collect();

        Ok(json!({
            "hostname": System::host_name(),
            "cpu_brand": cpu_brand,
            "cpu_count": sys.cpus().len(),
            "memory_total_bytes": sys.total_memory(),
            "arch": std::env::consts::ARCH,
            "disks": disks,
        }))
    }
}

pub struct NetworkProbe;

impl Probe for NetworkProbe {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn collect(&self) -> Result<Value> {
        let networks = Networks::new_with_refreshed_list();
        let interfaces: Vec<Value> = networks
            .iter()
            .map(|(name, data)| {
                let addresses: Vec<String> = data
                    .ip_networks()
                    .iter()
                    .map(|ip| format!("{}/{}", ip.addr, ip.prefix))
                    .collect();
                json!({
                    "name": name,
                    "mac": data.mac_address().to_string(),
                    "addresses": addresses,
                })
            })
            .collect();

        Ok(json!({
            "hostname": System::host_name(),
            "interfaces": interfaces,
        }))
    }
}

pub struct SoftwareProbe;

impl Probe for SoftwareProbe {
    fn domain(&self) -> Domain {
        Domain::Software
    }

    fn collect(&self) -> Result<Value> {
        Ok(json!({
            "os_name": System::name(),
            "os_version": System::os_version(),
            "kernel_version": System::kernel_version(),
            "packages": installed_packages(),
        }))
    }
}

/// Installed-package listing where the platform has a one-shot query tool.
/// Platforms without one report an empty list; the server side tolerates it.
fn installed_packages() -> Vec<String> {
    #[cfg(target_os = "linux")]
    {
        use std::process::Command;

        let dpkg = Command::new("dpkg-query")
            .args(["-W", "-f", "${Package} ${Version}\n"])
            .output();
        if let Ok(out) = dpkg {
            if out.status.success() {
                return stdout_lines(&out.stdout);
            }
        }
        let rpm = Command::new("rpm").arg("-qa").output();
        if let Ok(out) = rpm {
            if out.status.success() {
                return stdout_lines(&out.stdout);
            }
        }
        Vec::new()
    }
    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

#[allow(dead_code)]
fn stdout_lines(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_order_hardware_network_software() {
        let mut result = CollectionResult::new();
        result.insert(Domain::Software, Value::Null);
        result.insert(Domain::Hardware, Value::Null);
        result.insert(Domain::Network, Value::Null);
        let order: Vec<Domain> = result.keys().copied().collect();
        assert_eq!(order, vec![Domain::Hardware, Domain::Network, Domain::Software]);
    }

    #[test]
    fn domain_serializes_lowercase() {
        let mut result = CollectionResult::new();
        result.insert(Domain::Hardware, json!({"cpu_count": 4}));
        let raw = serde_json::to_string(&result).unwrap();
        assert!(raw.contains("\"hardware\""));
    }

    #[test]
    fn hardware_probe_reports_the_basics() {
        let payload = HardwareProbe.collect().unwrap();
        assert!(payload.get("cpu_count").is_some());
        assert!(payload.get("memory_total_bytes").is_some());
    }
}
