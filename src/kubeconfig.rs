//! Cluster connection details resolved from a kubeconfig file.
//!
//! Only the pieces the placer needs are read: the selected context's cluster
//! (server, CA, TLS verification) and user (bearer token or client
//! certificate). Exec and auth-provider plugins are not supported.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Option<Vec<NamedCluster>>,
    #[serde(default)]
    pub contexts: Option<Vec<NamedContext>>,
    #[serde(default)]
    pub users: Option<Vec<NamedUser>>,
    #[serde(default)]
    pub current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub client_key_data: Option<String>,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_file", &self.token_file)
            .field("client_certificate", &self.client_certificate)
            .field("client_key", &self.client_key)
            .finish_non_exhaustive()
    }
}

/// Everything needed to open an authenticated connection to the API server.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClusterConnection {
    pub server: String,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Client certificate followed by its private key, both PEM.
    pub identity_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("server", &self.server)
            .field("ca_pem", &self.ca_pem.as_ref().map(|pem| pem.len()))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("identity_pem", &self.identity_pem.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Kubeconfig {
    /// `$HOME/.kube/config`, or `config` in the working directory when HOME
    /// is unset.
    pub fn default_path() -> PathBuf {
        match std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            Some(home) => PathBuf::from(home).join(".kube").join("config"),
            None => PathBuf::from("config"),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolves `context` (or `current-context`) to a connection. Relative
    /// file references are taken relative to `base_dir`, the directory that
    /// holds the kubeconfig.
    pub fn connection(&self, context: Option<&str>, base_dir: &Path) -> Result<ClusterConnection, ConfigError> {
        let context_name = context
            .or(self.current_context.as_deref())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::Invalid("kubeconfig has no current-context".into()))?;

        let context = self
            .contexts
            .iter()
            .flatten()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| ConfigError::Invalid(format!("context {context_name:?} not found in kubeconfig")))?;

        let cluster = self
            .clusters
            .iter()
            .flatten()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| ConfigError::Invalid(format!("cluster {:?} not found in kubeconfig", context.cluster)))?;

        if cluster.server.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("cluster {:?} has no server", context.cluster)));
        }

        let mut connection = ClusterConnection {
            server: cluster.server.clone(),
            ca_pem: data_or_file(
                "certificate-authority-data",
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
                base_dir,
            )?,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            token: None,
            identity_pem: None,
        };

        let Some(user_name) = context.user.as_deref().filter(|name| !name.is_empty()) else {
            return Ok(connection);
        };
        let user = self
            .users
            .iter()
            .flatten()
            .find(|u| u.name == user_name)
            .map(|u| &u.user)
            .ok_or_else(|| ConfigError::Invalid(format!("user {user_name:?} not found in kubeconfig")))?;

        connection.token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => {
                let path = base_dir.join(file);
                let token = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        let cert = data_or_file(
            "client-certificate-data",
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
        )?;
        let key = data_or_file(
            "client-key-data",
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base_dir,
        )?;
        connection.identity_pem = match (cert, key) {
            (Some(mut pem), Some(key)) => {
                pem.push(b'\n');
                pem.extend_from_slice(&key);
                Some(pem)
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "user {user_name:?} needs both a client certificate and a client key"
                )))
            }
        };

        Ok(connection)
    }
}

impl ClusterConnection {
    /// Loads `path` and resolves `context` against it.
    pub fn from_kubeconfig(path: &Path, context: Option<&str>) -> Result<Self, ConfigError> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Kubeconfig::load(path)?.connection(context, base_dir)
    }
}

/// Inline base64 data wins over a file reference, as with kubectl.
fn data_or_file(
    field: &str,
    data: Option<&str>,
    file: Option<&Path>,
    base_dir: &Path,
) -> Result<Option<Vec<u8>>, ConfigError> {
    if let Some(encoded) = data {
        return STANDARD
            .decode(encoded.trim())
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{field} is not valid base64: {e}")));
    }
    match file {
        Some(file) => {
            let path = base_dir.join(file);
            std::fs::read(&path)
                .map(Some)
                .map_err(|source| ConfigError::Read { path, source })
        }
        None => Ok(None),
    }
}
