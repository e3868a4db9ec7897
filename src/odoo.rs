use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::agent::probes::{CollectionResult, Domain};
use crate::error::{AgentError, Result};
use crate::settings::ServerConfig;

/// Bound on the configurator's connection test and on every RPC round trip.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side collector modules, one per probe domain. A domain is only
/// collected and shipped while its module is installed on the server.
const COLLECTOR_MODULES: [(&str, Domain); 3] = [
    ("sgich_scan_hardware", Domain::Hardware),
    ("sgich_scan_network", Domain::Network),
    ("sgich_scan_software", Domain::Software),
];

/// Model that ingests agent payloads on the ERP side.
const SCAN_MODEL: &str = "sgich.scan.reception";

/// Which probe domains the server currently accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub hardware: bool,
    pub network: bool,
    pub software: bool,
}

impl CapabilitySet {
    pub fn all() -> Self {
        Self { hardware: true, network: true, software: true }
    }

    pub fn allows(&self, domain: Domain) -> bool {
        match domain {
            Domain::Hardware => self.hardware,
            Domain::Network => self.network,
            Domain::Software => self.software,
        }
    }
}

/// The narrow seam between the collection loop and the inventory server.
/// The loop only ever sees this trait; tests drive it with a scripted fake.
#[allow(async_fn_in_trait)]
pub trait InventoryServer {
    /// Cheap authenticated handshake. An error here is the signal for the
    /// retry-then-offline policy.
    async fn check_connection(&mut self) -> Result<()>;

    /// Refreshes the set of domains the server accepts.
    async fn capabilities(&mut self) -> Result<CapabilitySet>;

    /// Ships one aggregate collection result.
    async fn publish(&mut self, inventory_number: &str, result: &CollectionResult) -> Result<()>;
}

/// JSON-RPC client for the Odoo-backed inventory server.
///
/// Deliberately tolerant of server-side schema evolution: payloads are
/// opaque JSON and responses are only inspected for the fields the agent
/// needs. No `Debug` derive — the secret must never reach a log line.
pub struct OdooClient {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    username: String,
    secret: String,
    uid: Option<i64>,
}

impl OdooClient {
    pub fn new(server: &ServerConfig, secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/jsonrpc", server.url.trim_end_matches('/')),
            database: server.database.clone(),
            username: server.username.clone(),
            secret,
            uid: None,
        }
    }

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": chrono::Utc::now().timestamp_millis(),
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ConnectionFailed(format!("bad server reply: {e}")))?;
        if let Some(err) = body.get("error") {
            let message = err
                .pointer("/data/message")
                .or_else(|| err.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error");
            return Err(AgentError::ConnectionFailed(message.to_string()));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// `common.authenticate`; the returned uid doubles as the session token.
    pub async fn authenticate(&mut self) -> Result<i64> {
        let result = self
            .call(
                "common",
                "authenticate",
                json!([self.database, self.username, self.secret, {}]),
            )
            .await?;
        match result.as_i64() {
            Some(uid) if uid > 0 => {
                self.uid = Some(uid);
                Ok(uid)
            }
            // Odoo answers `false` on bad credentials rather than an error.
            _ => Err(AgentError::ConnectionFailed(format!(
                "authentication rejected for user '{}'",
                self.username
            ))),
        }
    }

    async fn execute_kw(&mut self, model: &str, method: &str, args: Value) -> Result<Value> {
        let uid = match self.uid {
            Some(uid) => uid,
            None => self.authenticate().await?,
        };
        self.call(
            "object",
            "execute_kw",
            json!([self.database, uid, self.secret, model, method, args]),
        )
        .await
    }
}

impl InventoryServer for OdooClient {
    async fn check_connection(&mut self) -> Result<()> {
        self.authenticate().await.map(|_| ())
    }

    async fn capabilities(&mut self) -> Result<CapabilitySet> {
        let names: Vec<&str> = COLLECTOR_MODULES.iter().map(|(n, _)| *n).collect();
        let installed = self
            .execute_kw(
                "ir.module.module",
                "search_read",
                json!([
                    [["name", "in", names], ["state", "=", "installed"]],
                    ["name"]
                ]),
            )
            .await?;
        let mut caps = CapabilitySet::default();
        if let Some(rows) = installed.as_array() {
            for row in rows {
                let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
                for (module, domain) in COLLECTOR_MODULES {
                    if name == module {
                        match domain {
                            Domain::Hardware => caps.hardware = true,
                            Domain::Network => caps.network = true,
                            Domain::Software => caps.software = true,
                        }
                    }
                }
            }
        }
        debug!("server capabilities: {caps:?}");
        Ok(caps)
    }

    async fn publish(&mut self, inventory_number: &str, result: &CollectionResult) -> Result<()> {
        let record = json!({
            "inventory_number": inventory_number,
            "scan_date": chrono::Utc::now().to_rfc3339(),
            "payload": serde_json::to_string(result)?,
        });
        self.execute_kw(SCAN_MODEL, "create", json!([record]))
            .await
            .map_err(|e| AgentError::PublishFailed(e.to_string()))?;
        Ok(())
    }
}

/// One bounded authenticated handshake for the configurator. Returns the
/// session uid, or the reason the server said no.
pub async fn test_connection(
    server: &ServerConfig,
    secret: &str,
) -> std::result::Result<i64, String> {
    let mut client = OdooClient::new(server, secret.to_string());
    client.authenticate().await.map_err(|e| e.to_string())
}
