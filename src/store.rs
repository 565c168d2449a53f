use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "tradfri_standalone_psk.conf";

/// Identity and pre-shared key that a gateway accepted during pairing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub identity: String,
    pub key: String,
}

/// Gateway host to the credentials paired with it.
pub type Credentials = BTreeMap<String, CredentialRecord>;

/// JSON file holding one [`CredentialRecord`] per gateway host.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        CredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Credentials> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("cannot parse {}: {}", self.path.display(), e))
        })
    }

    /// Like [`load`](Self::load), but a missing or broken file reads as empty.
    pub fn load_or_default(&self) -> Credentials {
        self.load().unwrap_or_else(|e| {
            debug!("no stored credentials: {}", e);
            Credentials::new()
        })
    }

    /// Replaces the file with `credentials`. The new contents go to a sibling
    /// file first and are renamed over the old one once flushed.
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let mut file = fs::File::create(&staging)?;
        file.write_all(serde_json::to_string_pretty(credentials)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    pub fn insert(&self, host: &str, record: CredentialRecord) -> Result<()> {
        let mut credentials = self.load_or_default();
        credentials.insert(host.to_string(), record);
        self.save(&credentials)?;
        info!("stored credentials for {} in {}", host, self.path.display());
        Ok(())
    }
}
