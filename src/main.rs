use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

pub mod agent;
pub mod bootstrap;
pub mod configurator;
pub mod error;
pub mod listener;
pub mod lock;
pub mod logging;
pub mod odoo;
pub mod settings;

use crate::agent::{probes, RestartFlag, Scheduler};
use crate::bootstrap::install::{self, Installed};
use crate::configurator::SetupArgs;
use crate::error::AgentError;
use crate::odoo::OdooClient;
use crate::settings::{vault, AgentConfig};

#[derive(Parser)]
#[command(name = "scan-agent", version, about = "SGICH IT asset scan agent", long_about = None)]
struct Cli {
    /// Run the interactive configurator
    #[arg(long)]
    config: bool,

    /// Plain-text configurator for headless hosts (implies --config)
    #[arg(long)]
    text_mode: bool,

    /// Unattended configuration: persist the given settings and exit
    #[arg(long, requires_all = ["odoo_url", "odoo_db", "odoo_user", "odoo_password", "inventory"])]
    setup: bool,

    /// Inventory server URL, e.g. http://erp.example.cl:8069
    #[arg(long)]
    odoo_url: Option<String>,

    /// Inventory server database
    #[arg(long)]
    odoo_db: Option<String>,

    /// Inventory server login
    #[arg(long)]
    odoo_user: Option<String>,

    /// Password or API key; goes to the OS vault, never to disk
    #[arg(long)]
    odoo_password: Option<String>,

    /// Inventory number for this host, or AUTO to derive one from the MAC
    #[arg(long)]
    inventory: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let install_dir = install::install_dir();

    let log_guard = match logging::init(&install_dir) {
        Ok(guard) => guard,
        Err(reason) => {
            logging::write_failsafe(&install_dir, &reason);
            eprintln!("fatal: {reason}");
            std::process::exit(1);
        }
    };

    // Uncaught panics in either worker still reach the daily file before
    // the unwind releases the lock guard.
    std::panic::set_hook(Box::new(|panic| {
        error!("internal panic: {panic}");
        eprintln!("internal panic: {panic}");
    }));

    let code = run(cli, &install_dir).await;
    drop(log_guard);
    std::process::exit(code);
}

async fn run(cli: Cli, install_dir: &Path) -> i32 {
    let args: Vec<String> = std::env::args().collect();
    if install::ensure_installed(&args) == Installed::Relaunched {
        return 0;
    }

    if cli.setup {
        let setup = SetupArgs {
            url: cli.odoo_url.unwrap_or_default(),
            database: cli.odoo_db.unwrap_or_default(),
            username: cli.odoo_user.unwrap_or_default(),
            password: cli.odoo_password.unwrap_or_default(),
            inventory: cli.inventory.unwrap_or_default(),
        };
        return match configurator::run_unattended(install_dir, &setup).await {
            Ok(()) => 0,
            Err(e) => {
                error!("unattended setup failed: {e}");
                1
            }
        };
    }

    // The configurator modes never take the instance lock: reconfiguring a
    // running agent is the point of `--config` on an already-active host.
    if cli.config || cli.text_mode {
        return match configurator::run_interactive(install_dir, cli.text_mode).await {
            Ok(()) => 0,
            Err(e) => {
                error!("configuration failed: {e}");
                1
            }
        };
    }

    let cfg = match load_or_configure(install_dir).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };

    let secret = match vault::fetch_secret(&cfg.server.username) {
        Ok(secret) => secret,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };

    let lock_guard = match lock::acquire(&lock::lock_path()) {
        Ok(guard) => {
            info!("instance lock held at {}", guard.path().display());
            guard
        }
        Err(AgentError::LockConflict(pid)) => {
            info!("duplicate instance: an agent already runs as pid {pid}, exiting");
            return 0;
        }
        Err(e) => {
            error!("cannot acquire the instance lock: {e}");
            return 1;
        }
    };

    run_agent(&cfg, install_dir, secret).await;
    drop(lock_guard);
    0
}

/// Returns a valid configuration, routing through the configurator when the
/// file is absent or unusable.
async fn load_or_configure(install_dir: &Path) -> error::Result<AgentConfig> {
    if let Some(cfg) = settings::load(install_dir) {
        if cfg.validate().is_ok() {
            return Ok(cfg);
        }
    }
    info!("configuration absent or invalid, starting the configurator");
    configurator::run_interactive(install_dir, false).await?;
    settings::load(install_dir)
        .ok_or_else(|| AgentError::ConfigurationAbsent(settings::config_path(install_dir)))
}

/// Two long-lived workers: the collection loop (owned here) and the control
/// listener. The loop exits when the restart flag is raised; the listener is
/// shut down afterwards so the restart caller always gets its reply.
async fn run_agent(cfg: &AgentConfig, install_dir: &Path, secret: String) {
    let flag = Arc::new(RestartFlag::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let listener_flag = Arc::clone(&flag);
    let port = cfg.listener_port;
    let listener_task = tokio::spawn(async move {
        if let Err(e) = listener::serve(port, listener_flag, shutdown_rx).await {
            error!("control listener failed: {e}");
        }
    });

    let client = OdooClient::new(&cfg.server, secret);
    let mut scheduler = Scheduler::new(
        cfg,
        install_dir.to_path_buf(),
        client,
        probes::default_probes(),
        Arc::clone(&flag),
    );
    scheduler.run().await;

    let _ = shutdown_tx.send(());
    let _ = listener_task.await;
    info!("agent stopped");
}
