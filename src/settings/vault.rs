use keyring::Entry;

use crate::error::{AgentError, Result};

/// Fixed service name under which every agent credential is filed in the
/// OS vault (Credential Manager, Keychain, Secret Service).
pub const SERVICE_NAME: &str = "sgich-scan-agent";

pub fn store_secret(username: &str, secret: &str) -> Result<()> {
    write_entry(&Entry::new(SERVICE_NAME, username)?, secret)
}

/// Reads the stored secret for `username`. A vault with no matching entry is
/// a `CredentialMissing` (rerun the configurator); anything else means the
/// vault itself is unusable on this host.
pub fn fetch_secret(username: &str) -> Result<String> {
    read_entry(&Entry::new(SERVICE_NAME, username)?, username)
}

fn write_entry(entry: &Entry, secret: &str) -> Result<()> {
    entry.set_password(secret)?;
    Ok(())
}

fn read_entry(entry: &Entry, username: &str) -> Result<String> {
    match entry.get_password() {
        Ok(secret) => Ok(secret),
        Err(keyring::Error::NoEntry) => Err(AgentError::CredentialMissing(username.to_string())),
        Err(e) => Err(AgentError::VaultUnavailable(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The mock builder hands out independent in-memory credentials, so each
    // test drives one Entry through both halves of the seam.
    fn mock_entry(username: &str) -> Entry {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        Entry::new(SERVICE_NAME, username).unwrap()
    }

    #[test]
    fn written_secret_is_read_back() {
        let entry = mock_entry("alice");
        write_entry(&entry, "p@ss").unwrap();
        assert_eq!(read_entry(&entry, "alice").unwrap(), "p@ss");
    }

    #[test]
    fn absent_entry_maps_to_credential_missing() {
        let entry = mock_entry("nobody");
        match read_entry(&entry, "nobody") {
            Err(AgentError::CredentialMissing(user)) => assert_eq!(user, "nobody"),
            other => panic!("expected CredentialMissing, got {other:?}"),
        }
    }
}
