use std::io::Write;
use std::path::Path;
use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};

use crate::bootstrap::autostart;
use crate::error::{AgentError, Result};
use crate::settings::{self, vault, AgentConfig, ServerConfig};
use crate::{lock, odoo};

/// How long the configurator waits for the live agent to acknowledge a
/// restart. No reply within this window: proceed and relaunch anyway.
const RESTART_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period for the acknowledged agent to leave its wait boundary.
const RESTART_GRACE: Duration = Duration::from_secs(2);

/// Values collected from the `--setup` flags for unattended deployment.
#[derive(Clone, Debug)]
pub struct SetupArgs {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub inventory: String,
}

/// Interactive configuration, default mode. `text_mode` swaps the line
/// editor for plain stdin so the flow works on dumb terminals over SSH.
pub async fn run_interactive(install_dir: &Path, text_mode: bool) -> Result<()> {
    let mut prompter = if text_mode { Prompter::text() } else { Prompter::interactive()? };
    let current = settings::load(install_dir).unwrap_or_default();

    println!("SGICH scan agent configuration (leave blank to keep the shown value)");

    let url = prompter.ask("Server URL", &current.server.url)?;
    let database = prompter.ask("Database", &current.server.database)?;
    let username = prompter.ask("Username", &current.server.username)?;
    let password = prompter.ask("Password (blank keeps the stored one)", "")?;
    let inventory = prompter.ask(
        "Inventory number (AUTO to derive from the MAC)",
        if current.inventory_number.is_empty() { "AUTO" } else { current.inventory_number.as_str() },
    )?;
    let main_interval =
        prompter.ask_number("Main interval, minutes", current.main_interval_minutes)?;
    let retry_interval =
        prompter.ask_number("Retry interval, minutes", current.retry_interval_minutes)?;
    let listener_port =
        prompter.ask_number("Control listener port", u64::from(current.listener_port))?;

    let cfg = AgentConfig {
        main_interval_minutes: main_interval,
        retry_interval_minutes: retry_interval,
        listener_port: u16::try_from(listener_port)
            .map_err(|_| AgentError::ConfigurationInvalid("listener port out of range".into()))?,
        inventory_number: settings::expand_auto_inventory(inventory.trim()),
        server: ServerConfig {
            url: url.trim().to_string(),
            database: database.trim().to_string(),
            username: username.trim().to_string(),
        },
    };
    cfg.validate().map_err(AgentError::ConfigurationInvalid)?;

    let secret = if password.trim().is_empty() {
        vault::fetch_secret(&cfg.server.username)
            .map_err(|_| AgentError::ConfigurationInvalid("no password given and none stored".into()))?
    } else {
        password.trim().to_string()
    };

    match odoo::test_connection(&cfg.server, &secret).await {
        Ok(uid) => println!("Connection OK (session uid {uid})."),
        Err(reason) => {
            warn!("connection test failed: {reason}");
            println!("Connection test failed: {reason}");
            if !prompter.confirm("Save this configuration anyway?")? {
                return Err(AgentError::ConfigurationCancelled);
            }
        }
    }

    persist(install_dir, &cfg, &secret)?;
    println!("Configuration saved to {}.", settings::config_path(install_dir).display());

    if agent_running(cfg.listener_port).await
        && prompter.confirm("An agent is running. Restart it with the new settings now?")?
    {
        restart_running_agent(cfg.listener_port, install_dir).await?;
    }
    Ok(())
}

/// Unattended `--setup` mode: validate, persist, register auto-start, exit.
pub async fn run_unattended(install_dir: &Path, args: &SetupArgs) -> Result<()> {
    let cfg = config_from_setup_args(args);
    cfg.validate().map_err(AgentError::ConfigurationInvalid)?;

    if let Err(reason) = odoo::test_connection(&cfg.server, &args.password).await {
        // Deployment automation often configures hosts before the server
        // exists on their network segment. Persist regardless.
        warn!("connection test failed during unattended setup: {reason}");
    }

    persist(install_dir, &cfg, &args.password)?;
    info!(
        "unattended configuration saved for inventory {}",
        cfg.inventory_number
    );
    Ok(())
}

pub fn config_from_setup_args(args: &SetupArgs) -> AgentConfig {
    let defaults = AgentConfig::default();
    AgentConfig {
        inventory_number: settings::expand_auto_inventory(args.inventory.trim()),
        server: ServerConfig {
            url: args.url.trim().to_string(),
            database: args.database.trim().to_string(),
            username: args.username.trim().to_string(),
        },
        ..defaults
    }
}

/// Vault first, file second: an unusable vault must leave nothing behind.
fn persist(install_dir: &Path, cfg: &AgentConfig, secret: &str) -> Result<()> {
    vault::store_secret(&cfg.server.username, secret)?;
    settings::save(install_dir, cfg)?;
    if let Ok(exe) = std::env::current_exe() {
        if let Err(e) = autostart::register(&exe) {
            warn!("auto-start registration failed: {e}");
        }
    }
    Ok(())
}

/// Whether a live agent answers on the control listener.
pub async fn agent_running(port: u16) -> bool {
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(2)).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(format!("http://127.0.0.1:{port}/status")).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Restart handshake with the live agent: ask it to wind down, give it a
/// grace period, reclaim the lock and launch the installed binary fresh.
pub async fn restart_running_agent(port: u16, install_dir: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(RESTART_ACK_TIMEOUT)
        .build()
        .unwrap_or_default();
    match client.post(format!("http://127.0.0.1:{port}/restart")).send().await {
        Ok(_) => info!("running agent acknowledged the restart"),
        Err(e) => warn!("no restart acknowledgement ({e}), relaunching anyway"),
    }
    tokio::time::sleep(RESTART_GRACE).await;

    let lock_path = lock::lock_path();
    if lock_path.exists() {
        let _ = std::fs::remove_file(&lock_path);
    }

    let exe_name = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .unwrap_or_else(|| "scan-agent".into());
    let installed = install_dir.join(exe_name);
    std::process::Command::new(&installed).spawn()?;
    info!("launched {}", installed.display());
    Ok(())
}

enum Prompter {
    Interactive(DefaultEditor),
    Text,
}

impl Prompter {
    fn interactive() -> Result<Self> {
        let editor = DefaultEditor::new()
            .map_err(|e| AgentError::ConfigurationInvalid(format!("cannot open terminal: {e}")))?;
        Ok(Prompter::Interactive(editor))
    }

    fn text() -> Self {
        Prompter::Text
    }

    fn ask(&mut self, label: &str, default: &str) -> Result<String> {
        match self {
            Prompter::Interactive(editor) => {
                match editor.readline_with_initial(&format!("{label}: "), (default, "")) {
                    Ok(line) => Ok(line.trim().to_string()),
                    Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                        Err(AgentError::ConfigurationCancelled)
                    }
                    Err(e) => Err(AgentError::ConfigurationInvalid(e.to_string())),
                }
            }
            Prompter::Text => {
                print!("{label} [{default}]: ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                let line = line.trim();
                Ok(if line.is_empty() { default.to_string() } else { line.to_string() })
            }
        }
    }

    fn ask_number(&mut self, label: &str, default: u64) -> Result<u64> {
        let raw = self.ask(label, &default.to_string())?;
        raw.trim()
            .parse::<u64>()
            .map_err(|_| AgentError::ConfigurationInvalid(format!("'{raw}' is not a number")))
    }

    fn confirm(&mut self, label: &str) -> Result<bool> {
        let answer = self.ask(&format!("{label} [y/N]"), "n")?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "s" | "si"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_args() -> SetupArgs {
        SetupArgs {
            url: "http://srv.example.cl:8069".into(),
            database: "prod".into(),
            username: "alice".into(),
            password: "p@ss".into(),
            inventory: "INV-100".into(),
        }
    }

    #[test]
    fn setup_args_become_a_valid_config_with_defaults() {
        let cfg = config_from_setup_args(&setup_args());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.inventory_number, "INV-100");
        assert_eq!(cfg.main_interval_minutes, 30);
        assert_eq!(cfg.listener_port, 9191);
    }

    #[test]
    fn auto_inventory_is_expanded_to_a_temp_number() {
        let mut args = setup_args();
        args.inventory = "AUTO".into();
        let cfg = config_from_setup_args(&args);
        assert!(cfg.inventory_number.starts_with("TEMP-"));
        assert!(cfg.inventory_number.len() > "TEMP-".len());
    }

    #[test]
    fn empty_setup_fields_fail_validation() {
        let mut args = setup_args();
        args.database.clear();
        let cfg = config_from_setup_args(&args);
        assert!(cfg.validate().is_err());
    }
}
