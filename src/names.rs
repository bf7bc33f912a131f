//! Persistent hardware-address → display-name mapping.
//!
//! Names live in a key/value store keyed by the canonical address string.
//! The first time an address is seen a default name is synthesized and
//! written back; afterwards the stored value is only read, so an operator
//! may rename a sensor by editing the store.

use crate::alias::Alias;
use crate::mac_address::MacAddress;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a [`KeyValueStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key '{0}' not found")]
    NotFound(String),
    #[error("invalid key '{0}'")]
    InvalidKey(String),
    #[error("I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Minimal key/value persistence used by the [`NameResolver`].
///
/// Latency bounds are the store's concern; the resolver awaits each call.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;

    fn write(&self, key: &str, value: &[u8])
    -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// File-per-key store rooted at a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    base: PathBuf,
}

impl DirStore {
    /// The directory is created on first write.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base.join(key))
    }
}

impl KeyValueStore for DirStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.base).await.map_err(io_err)?;

        // Readers never observe a partially written value
        let tmp = self.base.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, value).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)
    }
}

/// How a default name is synthesized for an unseen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NamePolicy {
    /// `Sensor <address>`
    #[default]
    Label,
    /// The bare canonical address
    Address,
}

impl NamePolicy {
    pub fn default_name(self, address: MacAddress) -> String {
        match self {
            NamePolicy::Label => format!("Sensor {address}"),
            NamePolicy::Address => address.to_string(),
        }
    }
}

/// Resolves display names, creating default entries lazily.
#[derive(Debug)]
pub struct NameResolver<S> {
    store: S,
    policy: NamePolicy,
}

impl<S: KeyValueStore> NameResolver<S> {
    pub fn new(store: S, policy: NamePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up the display name for `address`.
    ///
    /// Never fails and never returns an empty string:
    /// - stored value → returned trimmed of surrounding whitespace, with
    ///   line breaks folded into single spaces
    /// - missing key → default name is written (best effort) and returned
    /// - blank stored value or store error → default name, store untouched
    pub async fn resolve(&self, address: MacAddress) -> String {
        let key = address.to_string();

        match self.store.read(&key).await {
            Ok(value) => {
                let name = single_line(&String::from_utf8_lossy(&value));
                if name.is_empty() {
                    tracing::warn!(%address, "stored name is blank, using default");
                    self.policy.default_name(address)
                } else {
                    name
                }
            }
            Err(StoreError::NotFound(_)) => {
                let name = self.policy.default_name(address);
                tracing::info!(%address, name = %name, "new sensor, creating name entry");
                if let Err(err) = self.store.write(&key, name.as_bytes()).await {
                    tracing::warn!(%address, %err, "failed to store default name");
                }
                name
            }
            Err(err) => {
                tracing::warn!(%address, %err, "name lookup failed, using default");
                self.policy.default_name(address)
            }
        }
    }

    /// Write operator supplied aliases into the store, replacing existing
    /// names.
    ///
    /// # Errors
    /// Stops at the first failed write.
    pub async fn seed(&self, aliases: &[Alias]) -> Result<usize, StoreError> {
        for alias in aliases {
            self.store
                .write(&alias.address.to_string(), alias.name.as_bytes())
                .await?;
            tracing::debug!(address = %alias.address, name = %alias.name, "alias stored");
        }
        Ok(aliases.len())
    }
}

/// Join the non-blank lines of a hand-edited value with single spaces.
fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
