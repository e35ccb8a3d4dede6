//! S3 Object Store Implementation
//!
//! Production store backed by the `object_store` crate from the Arrow
//! ecosystem. Containers map to S3 buckets; a client is built lazily per
//! bucket and cached, since one trigger reads from the delivery bucket and
//! writes to the train bucket.
//!
//! Supports AWS S3 and S3-compatible services (MinIO, LocalStack) via a
//! custom endpoint.

use crate::store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// S3 connection settings shared by every bucket client
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// S3 object store for production deployments
///
/// Credentials come from the environment:
/// - AWS_ACCESS_KEY_ID
/// - AWS_SECRET_ACCESS_KEY
#[derive(Clone)]
pub struct S3ObjectStore {
    settings: S3Settings,
    clients: Arc<RwLock<HashMap<String, Arc<dyn ObjectStoreTrait>>>>,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub fn new(settings: S3Settings) -> Self {
        S3ObjectStore {
            settings,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or build the client for a bucket
    fn client(&self, container: &str) -> IoResult<Arc<dyn ObjectStoreTrait>> {
        if let Some(client) = self.clients.read().get(container) {
            return Ok(Arc::clone(client));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(container)
            .with_region(&self.settings.region);

        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let client: Arc<dyn ObjectStoreTrait> = Arc::new(builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("failed to create S3 client for {}: {}", container, e),
            )
        })?);

        self.clients
            .write()
            .insert(container.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => {
                IoError::new(ErrorKind::NotFound, err.to_string())
            }
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            _ => IoError::other(err.to_string()),
        }
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("region", &self.settings.region)
            .field("endpoint", &self.settings.endpoint)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client(container)?;
            let path = ObjectPath::from(key);
            client
                .put(&path, bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client(container)?;
            let path = ObjectPath::from(key);
            let result = client.get(&path).await.map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(data.to_vec())
        })
    }

    fn exists<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client(container)?;
            let path = ObjectPath::from(key);
            match client.head(&path).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            use futures::TryStreamExt;

            let client = self.client(container)?;
            let prefix_path = ObjectPath::from(prefix);

            let metas: Vec<_> = client
                .list(Some(&prefix_path))
                .try_collect()
                .await
                .map_err(Self::map_error)?;

            let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
            keys.sort();
            Ok(keys)
        })
    }
}
