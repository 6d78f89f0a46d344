//! Object-store construction for each connection-string backend.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::debug;

use crate::account::{AzureConfig, ConnectionString};
use crate::error::ConnectorError;
use crate::s3::S3Config;

/// Build the store holding `container` (bucket, Azure container or local
/// subdirectory).
pub fn build_store(
    connection: &ConnectionString,
    container: &str,
) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
    if container.is_empty() || container.contains('/') {
        return Err(ConnectorError::ConfigError(format!(
            "invalid container name '{}'",
            container
        )));
    }
    debug!("Building {} store for container '{}'", connection.kind(), container);

    let store: Arc<dyn ObjectStore> = match connection {
        ConnectionString::S3(config) => Arc::new(build_s3(config, container)?),
        ConnectionString::Azure(config) => Arc::new(build_azure(config, container)?),
        ConnectionString::Local(root) => {
            let dir = root.join(container);
            std::fs::create_dir_all(&dir).map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to create {:?}: {}", dir, e))
            })?;
            let store = LocalFileSystem::new_with_prefix(&dir).map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to build local store: {}", e))
            })?;
            Arc::new(store)
        }
        ConnectionString::Memory => Arc::new(InMemory::new()),
    };
    Ok(store)
}

fn build_s3(config: &S3Config, bucket: &str) -> Result<object_store::aws::AmazonS3, ConnectorError> {
    let mut builder = AmazonS3Builder::new()
        .with_region(&config.region)
        .with_bucket_name(bucket)
        .with_access_key_id(&config.access_key_id)
        .with_secret_access_key(&config.secret_access_key);

    if let Some(ref endpoint) = config.endpoint_url {
        builder = builder.with_endpoint(endpoint);
    }
    if config.allow_http {
        builder = builder.with_allow_http(true);
    }

    builder
        .build()
        .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to build S3 object store: {}", e)))
}

fn build_azure(
    config: &AzureConfig,
    container: &str,
) -> Result<object_store::azure::MicrosoftAzure, ConnectorError> {
    let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);

    if config.use_emulator {
        builder = builder.with_use_emulator(true);
    } else {
        builder = builder.with_account(&config.account_name);
        if let Some(ref key) = config.access_key {
            builder = builder.with_access_key(key);
        }
        if let Some(endpoint) = config.custom_endpoint() {
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
            builder = builder.with_endpoint(endpoint);
        }
    }

    builder
        .build()
        .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to build Azure object store: {}", e)))
}
