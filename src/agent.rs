pub mod offline;
pub mod probes;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::odoo::{CapabilitySet, InventoryServer};
use crate::settings::AgentConfig;
use self::probes::{CollectionResult, Probe};

/// Upper bound on a single probe invocation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one collect-and-publish pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycle {
    Success,
    Unsuccessful,
}

/// One-shot monotonic restart signal, set by the control listener and
/// observed by the loop at every wait boundary. Raising it twice is a no-op.
#[derive(Default)]
pub struct RestartFlag {
    raised: AtomicBool,
    notify: Notify,
}

impl RestartFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless the flag is (or gets) raised.
    /// Returns `true` when the wait ended because of the flag.
    pub async fn wait(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register the waiter before checking the flag so a concurrent
        // raise() cannot slip between the check and the select.
        notified.as_mut().enable();
        if self.is_raised() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_raised(),
            _ = &mut notified => true,
        }
    }
}

/// Worker A: the collection & publish loop.
///
/// Generic over the server seam so the cycle policy (retry once, then fall
/// back to an offline artifact) can be exercised against a scripted fake.
pub struct Scheduler<S: InventoryServer> {
    server: S,
    probes: Vec<Arc<dyn Probe>>,
    inventory_number: String,
    install_dir: PathBuf,
    main_interval: Duration,
    retry_interval: Duration,
    flag: Arc<RestartFlag>,
    last_result: Option<CollectionResult>,
}

impl<S: InventoryServer> Scheduler<S> {
    pub fn new(
        cfg: &AgentConfig,
        install_dir: PathBuf,
        server: S,
        probes: Vec<Arc<dyn Probe>>,
        flag: Arc<RestartFlag>,
    ) -> Self {
        Self {
            server,
            probes,
            inventory_number: cfg.inventory_number.clone(),
            install_dir,
            main_interval: Duration::from_secs(cfg.main_interval_minutes * 60),
            retry_interval: Duration::from_secs(cfg.retry_interval_minutes * 60),
            flag,
            last_result: None,
        }
    }

    /// Runs until the restart flag is raised. Every wait observes the flag;
    /// in-flight cycles are allowed to finish.
    pub async fn run(&mut self) {
        info!(
            "collection loop started (main interval {} min, retry {} min)",
            self.main_interval.as_secs() / 60,
            self.retry_interval.as_secs() / 60,
        );
        loop {
            let attempt = self.cycle().await;
            if attempt == Cycle::Unsuccessful {
                debug!("cycle unsuccessful, retrying in {:?}", self.retry_interval);
                if self.flag.wait(self.retry_interval).await {
                    break;
                }
                let retry = self.cycle().await;
                if retry == Cycle::Unsuccessful {
                    self.fall_back_offline().await;
                }
            }
            if self.flag.wait(self.main_interval).await {
                break;
            }
        }
        info!("restart signal observed, leaving the collection loop");
    }

    async fn cycle(&mut self) -> Cycle {
        if let Err(e) = self.server.check_connection().await {
            warn!("connection probe failed: {e}");
            return Cycle::Unsuccessful;
        }
        let caps = match self.server.capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!("capability refresh failed: {e}");
                return Cycle::Unsuccessful;
            }
        };

        let result = collect_domains(&self.probes, &caps).await;
        self.last_result = Some(result.clone());

        match self.server.publish(&self.inventory_number, &result).await {
            Ok(()) => {
                info!("published {} inventory domains", result.len());
                // Delivered data must never resurface in an offline artifact.
                self.last_result = None;
                Cycle::Success
            }
            Err(e) => {
                warn!("publish failed: {e}");
                Cycle::Unsuccessful
            }
        }
    }

    /// Second consecutive unsuccessful cycle: keep the data locally. Uses
    /// the failed cycle's own result when one was collected but not shipped,
    /// otherwise collects a fresh one (the connection probe may have failed
    /// before any probe ran, or the last result already reached the server).
    async fn fall_back_offline(&mut self) {
        let result = match self.last_result.take() {
            Some(result) => result,
            None => collect_domains(&self.probes, &CapabilitySet::all()).await,
        };
        if let Err(e) = offline::store(&self.install_dir, &self.inventory_number, result) {
            error!("could not store offline artifact: {e}");
        }
    }
}

/// Runs every capability-enabled probe sequentially, each on a blocking
/// worker under `PROBE_TIMEOUT`. A failing or timed-out probe is logged and
/// its domain recorded as empty; it never stops the other domains.
pub async fn collect_domains(
    probes: &[Arc<dyn Probe>],
    caps: &CapabilitySet,
) -> CollectionResult {
    let mut result = CollectionResult::new();
    for probe in probes {
        let domain = probe.domain();
        if !caps.allows(domain) {
            debug!("server does not accept {} data, skipping probe", domain.as_str());
            continue;
        }
        let worker = Arc::clone(probe);
        let outcome =
            tokio::time::timeout(PROBE_TIMEOUT, tokio::task::spawn_blocking(move || worker.collect()))
                .await;
        match outcome {
            Ok(Ok(Ok(payload))) => {
                result.insert(domain, payload);
            }
            Ok(Ok(Err(e))) => {
                warn!("{} probe failed: {e}", domain.as_str());
                result.insert(domain, json!({}));
            }
            Ok(Err(e)) => {
                warn!("{} probe worker crashed: {e}", domain.as_str());
                result.insert(domain, json!({}));
            }
            Err(_) => {
                warn!("{} probe exceeded {:?}", domain.as_str(), PROBE_TIMEOUT);
                result.insert(domain, json!({}));
            }
        }
    }
    result
}
