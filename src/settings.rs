pub mod vault;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_FILE: &str = "config_agente.json";

/// Connection parameters for the SGICH inventory server (an Odoo instance).
/// The password never travels through this struct; it lives in the OS vault.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub url: String,
    #[serde(rename = "db")]
    pub database: String,
    pub username: String,
}

/// Process-wide configuration. Read-only after load: a reconfiguration
/// rewrites the file and restarts the agent instead of mutating this.
///
/// The wire keys are the historical Spanish ones; deployed configurators and
/// provisioning scripts still write them.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(rename = "intervalo_principal_min")]
    pub main_interval_minutes: u64,
    #[serde(rename = "intervalo_reintento_min")]
    pub retry_interval_minutes: u64,
    pub listener_port: u16,
    pub inventory_number: String,
    #[serde(rename = "odoo_config")]
    pub server: ServerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            main_interval_minutes: 30,
            retry_interval_minutes: 5,
            listener_port: 9191,
            inventory_number: String::new(),
            server: ServerConfig {
                url: String::new(),
                database: String::new(),
                username: String::new(),
            },
        }
    }
}

impl AgentConfig {
    /// Every field must be non-empty before the collection loop may run.
    pub fn validate(&self) -> Result<(), String> {
        if self.main_interval_minutes == 0 {
            return Err("the main interval must be at least one minute".into());
        }
        if self.retry_interval_minutes == 0 {
            return Err("the retry interval must be at least one minute".into());
        }
        if self.inventory_number.trim().is_empty() {
            return Err("the inventory number is empty".into());
        }
        if self.server.url.trim().is_empty() {
            return Err("the server URL is empty".into());
        }
        url::Url::parse(&self.server.url).map_err(|e| format!("bad server URL: {e}"))?;
        if self.server.database.trim().is_empty() {
            return Err("the server database is empty".into());
        }
        if self.server.username.trim().is_empty() {
            return Err("the server username is empty".into());
        }
        Ok(())
    }
}

pub fn config_path(install_dir: &Path) -> PathBuf {
    install_dir.join(CONFIG_FILE)
}

/// Returns the persisted configuration, or `None` when the file is missing
/// or unparsable. Both cases route the caller to the configurator.
pub fn load(install_dir: &Path) -> Option<AgentConfig> {
    let path = config_path(install_dir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    match serde_json::from_str::<AgentConfig>(&raw) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!("{} is corrupt ({e}), reconfiguration required", path.display());
            None
        }
    }
}

/// Atomically writes the configuration: a sibling temp file is renamed over
/// the destination so a crash mid-write never leaves a half-written config.
pub fn save(install_dir: &Path, cfg: &AgentConfig) -> std::io::Result<()> {
    fs::create_dir_all(install_dir)?;
    let path = config_path(install_dir);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(cfg)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// `TEMP-<MAC without colons, uppercase>` for hosts enrolled with `AUTO`.
pub fn temp_inventory_from_mac(mac: &[u8; 6]) -> String {
    let hex: String = mac.iter().map(|b| format!("{b:02X}")).collect();
    format!("TEMP-{hex}")
}

/// Expands the literal `AUTO` using the first stable non-loopback MAC.
/// Hosts with no usable interface fall back to the hostname so enrollment
/// still produces a distinct identifier.
pub fn expand_auto_inventory(inventory: &str) -> String {
    if inventory != "AUTO" {
        return inventory.to_string();
    }
    let networks = sysinfo::Networks::new_with_refreshed_list();
    for (name, data) in networks.iter() {
        if name.starts_with("lo") {
            continue;
        }
        let mac = data.mac_address();
        if mac.0 != [0u8; 6] {
            return temp_inventory_from_mac(&mac.0);
        }
    }
    let host = sysinfo::System::host_name().unwrap_or_else(|| "UNKNOWN".into());
    format!("TEMP-{}", host.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentConfig {
        AgentConfig {
            main_interval_minutes: 45,
            retry_interval_minutes: 5,
            listener_port: 9191,
            inventory_number: "INV-0042".into(),
            server: ServerConfig {
                url: "http://erp.example.cl:8069".into(),
                database: "prod".into(),
                username: "alice".into(),
            },
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sample();
        save(dir.path(), &cfg).unwrap();
        assert_eq!(load(dir.path()), Some(cfg));
    }

    #[test]
    fn wire_keys_are_the_historical_ones() {
        let raw = serde_json::to_value(sample()).unwrap();
        assert!(raw.get("intervalo_principal_min").is_some());
        assert!(raw.get("intervalo_reintento_min").is_some());
        assert_eq!(raw["odoo_config"]["db"], "prod");
        // The secret must have no slot in the file at all.
        assert!(raw.get("password").is_none());
        assert!(raw["odoo_config"].get("password").is_none());
    }

    #[test]
    fn missing_and_corrupt_files_both_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(dir.path()), None);
        fs::write(config_path(dir.path()), "{not json").unwrap();
        assert_eq!(load(dir.path()), None);
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let mut cfg = sample();
        assert!(cfg.validate().is_ok());
        cfg.inventory_number.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.server.url = "not a url".into();
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.main_interval_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auto_expansion_strips_colons_and_uppercases() {
        let inv = temp_inventory_from_mac(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x2a]);
        assert_eq!(inv, "TEMP-DEADBEEF002A");
    }

    #[test]
    fn non_auto_inventory_is_left_alone() {
        assert_eq!(expand_auto_inventory("INV-7"), "INV-7");
    }
}
