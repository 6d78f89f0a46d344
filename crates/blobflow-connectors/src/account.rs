//! Connection strings and the named storage-account catalog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::ConnectorError;
use crate::s3::S3Config;

const AZURE_PREFIX: &str = "DefaultEndpointsProtocol=";
const AZURE_DEV_STORAGE: &str = "UseDevelopmentStorage=";
const AZURE_BLOB_ENDPOINT: &str = "BlobEndpoint=";
const S3_PREFIX: &str = "provider=s3";
const FILE_SCHEME: &str = "file://";
const MEMORY_SCHEME: &str = "memory://";

/// Azure storage account settings. The key is redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub account_name: String,
    pub access_key: Option<String>,
    pub protocol: String,
    pub endpoint_suffix: String,
    pub blob_endpoint: Option<String>,
    /// Target the local Azurite emulator.
    pub use_emulator: bool,
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account_name", &self.account_name)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("protocol", &self.protocol)
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("blob_endpoint", &self.blob_endpoint)
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

impl AzureConfig {
    fn from_pairs(pairs: &BTreeMap<String, String>) -> Result<Self, ConnectorError> {
        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                account_name: "devstoreaccount1".to_string(),
                access_key: None,
                protocol: "http".to_string(),
                endpoint_suffix: "core.windows.net".to_string(),
                blob_endpoint: None,
                use_emulator: true,
            });
        }

        let account_name = pairs.get("accountname").cloned().ok_or_else(|| {
            ConnectorError::ConfigError("Azure connection string is missing AccountName".to_string())
        })?;

        Ok(Self {
            account_name,
            access_key: pairs.get("accountkey").cloned(),
            protocol: pairs
                .get("defaultendpointsprotocol")
                .cloned()
                .unwrap_or_else(|| "https".to_string()),
            endpoint_suffix: pairs
                .get("endpointsuffix")
                .cloned()
                .unwrap_or_else(|| "core.windows.net".to_string()),
            blob_endpoint: pairs.get("blobendpoint").cloned(),
            use_emulator: false,
        })
    }

    /// Endpoint URL for the blob service, when it differs from the public
    /// Azure default.
    pub fn custom_endpoint(&self) -> Option<String> {
        if let Some(ref endpoint) = self.blob_endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        if self.protocol != "https" || self.endpoint_suffix != "core.windows.net" {
            return Some(format!(
                "{}://{}.blob.{}",
                self.protocol, self.account_name, self.endpoint_suffix
            ));
        }
        None
    }
}

/// A parsed storage connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionString {
    Azure(AzureConfig),
    S3(S3Config),
    /// A local directory; containers are its subdirectories.
    Local(PathBuf),
    /// A fresh in-process store.
    Memory,
}

impl ConnectionString {
    /// Whether `s` is written as a connection string rather than an
    /// account name.
    pub fn is_connection_string(s: &str) -> bool {
        s.starts_with(AZURE_PREFIX)
            || s.starts_with(AZURE_DEV_STORAGE)
            || s.starts_with(AZURE_BLOB_ENDPOINT)
            || s.to_ascii_lowercase().starts_with(S3_PREFIX)
            || s.starts_with(FILE_SCHEME)
            || s.starts_with(MEMORY_SCHEME)
    }

    pub fn parse(s: &str) -> Result<Self, ConnectorError> {
        let s = s.trim();

        if s.starts_with(MEMORY_SCHEME) {
            return Ok(ConnectionString::Memory);
        }
        if s.starts_with(FILE_SCHEME) {
            let url = Url::parse(s)
                .map_err(|e| ConnectorError::ConfigError(format!("invalid file URL '{}': {}", s, e)))?;
            let path = url.to_file_path().map_err(|_| {
                ConnectorError::ConfigError(format!("file URL '{}' is not an absolute local path", s))
            })?;
            return Ok(ConnectionString::Local(path));
        }

        let pairs = parse_pairs(s)?;
        if pairs.get("provider").is_some_and(|p| p.eq_ignore_ascii_case("s3")) {
            return Ok(ConnectionString::S3(S3Config::from_pairs(&pairs)?));
        }
        if s.starts_with(AZURE_PREFIX) || s.starts_with(AZURE_DEV_STORAGE) || s.starts_with(AZURE_BLOB_ENDPOINT) {
            return Ok(ConnectionString::Azure(AzureConfig::from_pairs(&pairs)?));
        }

        Err(ConnectorError::UnsupportedConnectionString(redact(s)))
    }

    /// Short backend name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionString::Azure(_) => "azure",
            ConnectionString::S3(_) => "s3",
            ConnectionString::Local(_) => "local",
            ConnectionString::Memory => "memory",
        }
    }
}

/// Split `Key=Value;Key=Value` into lower-cased keys. Values keep any
/// `=` after the first (account keys are base64).
fn parse_pairs(s: &str) -> Result<BTreeMap<String, String>, ConnectorError> {
    let mut pairs = BTreeMap::new();
    for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            ConnectorError::UnsupportedConnectionString(format!("expected Key=Value, got '{}'", redact(part)))
        })?;
        pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(pairs)
}

/// Keep only the keys of a connection string for error messages.
fn redact(s: &str) -> String {
    s.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, _)) => format!("{}=***", key),
            None => "***".to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Named storage accounts, persisted as `{ "accounts": { name: connection_string } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCatalog {
    #[serde(default)]
    accounts: BTreeMap<String, String>,
}

impl AccountCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog file. A missing file is an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No account catalog at {:?}, starting empty", path);
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(ConnectorError::ConfigError(format!(
                    "failed to read account catalog {:?}: {}",
                    path, e
                )))
            }
        };
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConnectorError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| {
            ConnectorError::ConfigError(format!("failed to write account catalog {:?}: {}", path, e))
        })?;
        info!("Saved {} accounts to {:?}", self.accounts.len(), path);
        Ok(())
    }

    /// Add or replace an account. The connection string must parse.
    pub fn add(&mut self, name: &str, connection_string: &str) -> Result<(), ConnectorError> {
        if name.trim().is_empty() || ConnectionString::is_connection_string(name) {
            return Err(ConnectorError::ConfigError(format!(
                "invalid account name '{}'",
                name
            )));
        }
        ConnectionString::parse(connection_string)?;
        self.accounts
            .insert(name.to_string(), connection_string.trim().to_string());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), ConnectorError> {
        self.accounts
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ConnectorError::AccountNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.accounts.keys().map(String::as_str).collect()
    }

    /// Turn an account argument into a connection string: connection
    /// strings pass through, anything else is looked up by name.
    pub fn resolve(&self, account: &str) -> Result<String, ConnectorError> {
        if ConnectionString::is_connection_string(account) {
            return Ok(account.to_string());
        }
        self.accounts
            .get(account)
            .cloned()
            .ok_or_else(|| ConnectorError::AccountNotFound(account.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AZURE: &str = "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=a2V5PQ==;EndpointSuffix=core.windows.net";

    #[test]
    fn parses_azure_account() {
        match ConnectionString::parse(AZURE).unwrap() {
            ConnectionString::Azure(config) => {
                assert_eq!(config.account_name, "acme");
                assert_eq!(config.access_key.as_deref(), Some("a2V5PQ=="));
                assert_eq!(config.custom_endpoint(), None);
                assert!(!format!("{:?}", config).contains("a2V5"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn azure_sovereign_cloud_gets_endpoint() {
        let s = "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=k;EndpointSuffix=core.chinacloudapi.cn";
        let ConnectionString::Azure(config) = ConnectionString::parse(s).unwrap() else {
            panic!("expected azure");
        };
        assert_eq!(
            config.custom_endpoint().as_deref(),
            Some("https://acme.blob.core.chinacloudapi.cn")
        );
    }

    #[test]
    fn parses_development_storage() {
        let ConnectionString::Azure(config) =
            ConnectionString::parse("UseDevelopmentStorage=true").unwrap()
        else {
            panic!("expected azure");
        };
        assert!(config.use_emulator);
        assert_eq!(config.account_name, "devstoreaccount1");
    }

    #[test]
    fn parses_s3_local_and_memory() {
        let s3 = ConnectionString::parse("Provider=S3;Region=eu-west-1;AccessKeyId=a;SecretAccessKey=b").unwrap();
        assert_eq!(s3.kind(), "s3");
        assert_eq!(
            ConnectionString::parse("file:///var/data").unwrap(),
            ConnectionString::Local(PathBuf::from("/var/data"))
        );
        assert_eq!(ConnectionString::parse("memory://").unwrap(), ConnectionString::Memory);
    }

    #[test]
    fn unsupported_strings_are_redacted() {
        let err = ConnectionString::parse("Server=db;Password=hunter2").unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedConnectionString(_)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn catalog_resolves_names_and_passes_strings_through() {
        let mut catalog = AccountCatalog::new();
        catalog.add("prod", AZURE).unwrap();

        assert_eq!(catalog.resolve("prod").unwrap(), AZURE);
        assert_eq!(catalog.resolve("memory://").unwrap(), "memory://");
        assert!(matches!(
            catalog.resolve("staging"),
            Err(ConnectorError::AccountNotFound(_))
        ));
        assert_eq!(catalog.names(), vec!["prod"]);

        catalog.remove("prod").unwrap();
        assert!(catalog.remove("prod").is_err());
    }

    #[test]
    fn catalog_rejects_bad_entries() {
        let mut catalog = AccountCatalog::new();
        assert!(catalog.add("", AZURE).is_err());
        assert!(catalog.add("x", "nonsense").is_err());
        assert!(catalog.names().is_empty());
    }

    #[test]
    fn catalog_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        assert_eq!(AccountCatalog::load(&path).unwrap(), AccountCatalog::new());

        let mut catalog = AccountCatalog::new();
        catalog.add("local", "file:///tmp/blobs").unwrap();
        catalog.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"accounts\""));
        assert_eq!(AccountCatalog::load(&path).unwrap(), catalog);
    }
}
