//! The provisioned mapping from routing keys to the authorities that can
//! verify tokens carrying them
//!
//! The registry is assembled once at startup and is read-only from then on.
//! Lookups are exact; a key that was not provisioned never falls back to
//! some default authority.

use std::{collections::HashMap, fmt, io, path::Path, path::PathBuf, str::FromStr};

use thiserror::Error;
use url::Url;

use crate::{RoutingKey, RoutingKeyRef};

/// The base URL of an authority able to verify tokens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityEndpoint {
    base: Url,
}

impl AuthorityEndpoint {
    /// The base URL of the authority
    #[inline]
    pub fn url(&self) -> &Url {
        &self.base
    }

    /// Appends `path` to the base URL, preserving any path prefix already
    /// present on the base and dropping any query or fragment
    ///
    /// ```
    /// # use tokenfed::registry::AuthorityEndpoint;
    /// let endpoint: AuthorityEndpoint = "https://proxy.internal/cluster-a/".parse().unwrap();
    /// let url = endpoint.join_path("/apis/authentication.k8s.io/v1/tokenreviews");
    ///
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://proxy.internal/cluster-a/apis/authentication.k8s.io/v1/tokenreviews",
    /// );
    /// ```
    pub fn join_path(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        // Parsing rejects cannot-be-a-base URLs, so segments are always available
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    fn is_tls(&self) -> bool {
        self.base.scheme() == "https"
    }
}

impl FromStr for AuthorityEndpoint {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = Url::parse(s.trim())?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(url::ParseError::EmptyHost);
        }
        Ok(Self { base })
    }
}

impl fmt::Display for AuthorityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.base, f)
    }
}

/// A single `KEY=URL` registry entry, as accepted on a command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityEntry {
    /// The routing key
    pub key: RoutingKey,
    /// The authority responsible for tokens carrying the key
    pub endpoint: AuthorityEndpoint,
}

impl FromStr for AuthorityEntry {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, url) = s
            .split_once('=')
            .ok_or_else(|| RegistryError::InvalidEntry(s.to_owned()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        let key = RoutingKey::from(key);
        let endpoint = url.parse::<AuthorityEndpoint>().map_err(|source| RegistryError::InvalidUrl {
            key: key.clone(),
            source,
        })?;
        Ok(Self { key, endpoint })
    }
}

/// Indicates that no authority was provisioned for the routing key
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no authority provisioned for key id {key}")]
pub struct UnknownAuthority {
    /// The key that was looked up
    pub key: RoutingKey,
}

/// An error while assembling the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An entry was not of the form `KEY=URL`
    #[error("registry entry {0:?} is not of the form KEY=URL")]
    InvalidEntry(String),
    /// An entry had an empty key
    #[error("registry entry has an empty key")]
    EmptyKey,
    /// An entry's URL could not be parsed
    #[error("authority URL for key id {key} is invalid")]
    InvalidUrl {
        /// The key of the offending entry
        key: RoutingKey,
        /// The underlying parse failure
        source: url::ParseError,
    },
    /// An entry did not use TLS while plaintext authorities were not allowed
    #[error("authority URL for key id {key} uses {scheme}, but only https is allowed")]
    InsecureScheme {
        /// The key of the offending entry
        key: RoutingKey,
        /// The scheme that was used
        scheme: String,
    },
    /// The same key was provisioned twice
    #[error("key id {key} is provisioned more than once")]
    DuplicateKey {
        /// The duplicated key
        key: RoutingKey,
    },
    /// The registry directory could not be read
    #[error("unable to read registry directory {}", .path.display())]
    ReadDir {
        /// The directory
        path: PathBuf,
        /// The underlying I/O failure
        source: io::Error,
    },
    /// A registry file could not be read
    #[error("unable to read registry entry {}", .path.display())]
    ReadEntry {
        /// The file
        path: PathBuf,
        /// The underlying I/O failure
        source: io::Error,
    },
}

/// Resolves routing keys to authorities
pub trait AuthorityResolver: Send + Sync {
    /// Looks up the authority provisioned for `key`
    ///
    /// # Errors
    ///
    /// Returns [`UnknownAuthority`] if nothing was provisioned for the key.
    fn resolve(&self, key: &RoutingKeyRef) -> Result<&AuthorityEndpoint, UnknownAuthority>;
}

/// An immutable registry built at startup
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct StaticRegistry {
    entries: HashMap<RoutingKey, AuthorityEndpoint>,
}

impl StaticRegistry {
    /// Starts assembling a registry
    #[inline]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The number of provisioned authorities
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no authorities have been provisioned
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the provisioned keys
    pub fn keys(&self) -> impl Iterator<Item = &RoutingKeyRef> {
        self.entries.keys().map(|k| &**k)
    }
}

impl AuthorityResolver for StaticRegistry {
    fn resolve(&self, key: &RoutingKeyRef) -> Result<&AuthorityEndpoint, UnknownAuthority> {
        self.entries.get(key).ok_or_else(|| UnknownAuthority {
            key: key.to_owned(),
        })
    }
}

/// Builder for a [`StaticRegistry`]
#[derive(Debug, Default)]
#[must_use]
pub struct RegistryBuilder {
    entries: Vec<AuthorityEntry>,
    allow_plaintext: bool,
}

impl RegistryBuilder {
    /// Constructs an empty builder that only accepts `https` authorities
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts authorities reachable over plain `http`
    ///
    /// Only intended for local testing; tokens are sent to the authority
    /// as bearer credentials.
    #[inline]
    pub fn allow_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Adds an entry
    #[inline]
    pub fn with_entry(mut self, entry: AuthorityEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Adds an entry from a key and URL
    pub fn with_authority(
        self,
        key: impl Into<RoutingKey>,
        url: &str,
    ) -> Result<Self, RegistryError> {
        let key = key.into();
        if key.as_str().is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        let endpoint = url.parse::<AuthorityEndpoint>().map_err(|source| RegistryError::InvalidUrl {
            key: key.clone(),
            source,
        })?;
        Ok(self.with_entry(AuthorityEntry { key, endpoint }))
    }

    /// Adds one entry per file in `dir`
    ///
    /// The file name is the routing key and the trimmed file contents are
    /// the authority URL, which matches the layout of a mounted ConfigMap.
    /// Hidden entries (including the `..data` links maintained by the
    /// kubelet) and anything that is not a file are skipped. Symlinks are
    /// followed.
    pub async fn load_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        let read_dir_err = |source| RegistryError::ReadDir {
            path: dir.to_owned(),
            source,
        };

        let mut read_dir = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
        let mut loaded = 0_usize;

        while let Some(entry) = read_dir.next_entry().await.map_err(read_dir_err)? {
            let path = entry.path();
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    tracing::warn!(?name, "skipping registry entry with a non-UTF-8 name");
                    continue;
                }
            };

            if name.starts_with('.') {
                continue;
            }

            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|source| RegistryError::ReadEntry {
                    path: path.clone(),
                    source,
                })?;

            if !metadata.is_file() {
                continue;
            }

            let url = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| RegistryError::ReadEntry {
                    path: path.clone(),
                    source,
                })?;

            self = self.with_authority(name, &url)?;
            loaded += 1;
        }

        tracing::info!(registry.dir = %dir.display(), registry.loaded = loaded, "loaded authority registry directory");

        Ok(self)
    }

    /// Validates the entries and freezes the registry
    pub fn build(self) -> Result<StaticRegistry, RegistryError> {
        let mut entries = HashMap::with_capacity(self.entries.len());

        for AuthorityEntry { key, endpoint } in self.entries {
            if !self.allow_plaintext && !endpoint.is_tls() {
                return Err(RegistryError::InsecureScheme {
                    key,
                    scheme: endpoint.url().scheme().to_owned(),
                });
            }

            if entries.contains_key(&key) {
                return Err(RegistryError::DuplicateKey { key });
            }

            tracing::debug!(routing_key = %key, authority = %endpoint, "provisioned authority");
            entries.insert(key, endpoint);
        }

        Ok(StaticRegistry { entries })
    }
}
