//! Typed errors for the connectors crate.

use std::fmt;

use blobflow_core::PipelineError;

/// Errors raised while resolving accounts or talking to a blob store.
#[derive(Debug)]
pub enum ConnectorError {
    /// Failed to build a client for the storage backend.
    ConnectionFailed(String),
    /// The requested blob does not exist.
    BlobNotFound(String),
    /// The connection string does not name a supported backend.
    UnsupportedConnectionString(String),
    /// No account of this name is in the catalog.
    AccountNotFound(String),
    /// Invalid or missing configuration.
    ConfigError(String),
    /// A request against the storage backend failed.
    StorageFailed(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            ConnectorError::BlobNotFound(msg) => write!(f, "blob not found: {}", msg),
            ConnectorError::UnsupportedConnectionString(msg) => {
                write!(f, "unsupported connection string: {}", msg)
            }
            ConnectorError::AccountNotFound(name) => write!(
                f,
                "storage account \"{}\" not found (hint: add it with `blobflow account add {} <connection-string>`)",
                name, name
            ),
            ConnectorError::ConfigError(msg) => write!(f, "config error: {}", msg),
            ConnectorError::StorageFailed(msg) => write!(f, "storage request failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<object_store::Error> for ConnectorError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => ConnectorError::BlobNotFound(path),
            other => ConnectorError::StorageFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::ConfigError(e.to_string())
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::ConfigError(_)
            | ConnectorError::UnsupportedConnectionString(_)
            | ConnectorError::AccountNotFound(_) => PipelineError::Config(e.to_string()),
            _ => PipelineError::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_not_found_has_hint() {
        let msg = ConnectorError::AccountNotFound("prod".into()).to_string();
        assert!(msg.starts_with("storage account \"prod\" not found"));
        assert!(msg.contains("blobflow account add prod"));
    }

    #[test]
    fn maps_onto_pipeline_errors() {
        assert!(matches!(
            PipelineError::from(ConnectorError::BlobNotFound("a".into())),
            PipelineError::Transport(_)
        ));
        assert!(matches!(
            PipelineError::from(ConnectorError::AccountNotFound("a".into())),
            PipelineError::Config(_)
        ));
    }

    #[test]
    fn object_store_not_found_keeps_path() {
        let err = object_store::Error::NotFound {
            path: "c/x.csv".to_string(),
            source: "missing".into(),
        };
        match ConnectorError::from(err) {
            ConnectorError::BlobNotFound(path) => assert_eq!(path, "c/x.csv"),
            other => panic!("unexpected: {}", other),
        }
    }
}
