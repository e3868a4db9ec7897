use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::probes::CollectionResult;
use crate::error::Result;

pub const OFFLINE_DIR: &str = "offline";

/// A collection result the server could not be given across the retry.
/// Produce-only: the loop never re-ingests these; recovery is out-of-band
/// (an operator or a support script picks the files up).
#[derive(Debug, Deserialize, Serialize)]
pub struct OfflineArtifact {
    pub timestamp: String,
    pub inventory_number: String,
    pub result: CollectionResult,
}

/// Persists one artifact under `<install>/offline/` and returns its path.
pub fn store(install_dir: &Path, inventory_number: &str, result: CollectionResult) -> Result<PathBuf> {
    let dir = install_dir.join(OFFLINE_DIR);
    fs::create_dir_all(&dir)?;

    let now = chrono::Local::now();
    let artifact = OfflineArtifact {
        timestamp: now.to_rfc3339(),
        inventory_number: inventory_number.to_string(),
        result,
    };
    let path = dir.join(format!("scan_{}.json", now.format("%Y%m%d_%H%M%S")));
    fs::write(&path, serde_json::to_string_pretty(&artifact)?)?;
    info!("stored offline artifact {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::probes::Domain;
    use serde_json::json;

    #[test]
    fn artifact_lands_in_offline_dir_with_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = CollectionResult::new();
        result.insert(Domain::Hardware, json!({"cpu_count": 8}));

        let path = store(dir.path(), "INV-9", result).unwrap();
        assert!(path.starts_with(dir.path().join(OFFLINE_DIR)));

        let artifact: OfflineArtifact =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(artifact.inventory_number, "INV-9");
        assert_eq!(artifact.result[&Domain::Hardware]["cpu_count"], 8);
    }
}
