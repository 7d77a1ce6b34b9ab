pub mod backend;
pub mod s3;

pub use backend::ObjectStoreStorage;
pub use s3::S3Storage;

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use common::Result;
use common::config::{StorageBackend, StorageSettings};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Blob storage scoped to one bucket.
///
/// Reads of a missing key fail with `Error::NotFound`; other read failures
/// are `Error::StorageRead` and write failures `Error::StorageWrite`.
/// A rejected conditional write is `Error::Conflict`.
///
/// `list_objects` returns keys in whatever order the backend lists them.
/// S3 and the in-memory store happen to be lexicographic, the local
/// filesystem is not.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn put_object_if(&self, key: &str, data: &[u8], condition: WriteCondition)
    -> Result<()>;
    async fn get_object_versioned(&self, key: &str) -> Result<VersionedObject>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn check_file_exists(&self, key: &str) -> Result<bool>;
    fn bucket(&self) -> &str;

    /// Whether `put_object_if` honours `WriteCondition::Matches`.
    fn supports_conditional_update(&self) -> bool {
        true
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.get_object_versioned(key).await?.data)
    }
}

#[derive(Debug, Clone)]
pub struct VersionedObject {
    pub data: Vec<u8>,
    /// ETag reported by the backend, if it reports one.
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Only write if nothing exists at the key yet.
    NotExists,
    /// Only write if the current object still carries this ETag.
    Matches(String),
}

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl From<&StorageSettings> for S3Config {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            region: settings.region.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        }
    }
}

#[derive(Clone)]
pub struct S3Manager {
    pub config: S3Config,
    client_cache: Arc<DashMap<String, Arc<S3Client>>>,
}

impl S3Manager {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client_cache: Arc::new(DashMap::new()),
        }
    }

    pub async fn get_client(&self, bucket: &str) -> Result<Arc<S3Client>> {
        if let Some(client) = self.client_cache.get(bucket) {
            return Ok(client.clone());
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let (Some(access_key), Some(secret_key)) =
            (&self.config.access_key, &self.config.secret_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "static",
            ));
        }

        // MinIO and other S3-compatible servers need path-style addressing.
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Arc::new(S3Client::from_conf(builder.build()));
        self.client_cache.insert(bucket.to_string(), client.clone());
        debug!(bucket, endpoint = ?self.config.endpoint, "Created S3 client");
        Ok(client)
    }
}

/// Hands out one storage handle per bucket for the configured backend.
pub struct StorageFactory {
    settings: StorageSettings,
    s3_manager: Arc<S3Manager>,
    stores: DashMap<String, Arc<dyn ObjectStorage>>,
}

impl StorageFactory {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            settings: settings.clone(),
            s3_manager: Arc::new(S3Manager::new(S3Config::from(settings))),
            stores: DashMap::new(),
        }
    }

    pub async fn storage(&self, bucket: &str) -> Result<Arc<dyn ObjectStorage>> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStorage> = match self.settings.backend {
            StorageBackend::S3 => Arc::new(S3Storage::new(self.s3_manager.clone(), bucket).await?),
            StorageBackend::Local => {
                Arc::new(ObjectStoreStorage::local(&self.settings.local_root, bucket)?)
            }
            StorageBackend::Memory => Arc::new(ObjectStoreStorage::in_memory(bucket)),
        };

        self.stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_reuses_store_per_bucket() {
        let settings = StorageSettings {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let factory = StorageFactory::new(&settings);

        let first = factory.storage("bronze").await.unwrap();
        first.put_object("a.csv", b"x").await.unwrap();

        let again = factory.storage("bronze").await.unwrap();
        assert_eq!(again.get_object("a.csv").await.unwrap(), b"x");

        let other = factory.storage("silver").await.unwrap();
        assert!(!other.check_file_exists("a.csv").await.unwrap());
    }

    #[tokio::test]
    async fn local_backend_roots_each_bucket_in_its_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            backend: StorageBackend::Local,
            local_root: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let factory = StorageFactory::new(&settings);

        let store = factory.storage("bronze").await.unwrap();
        store.put_object("Raw_data/Bronze/a.csv", b"x").await.unwrap();

        assert!(dir.path().join("bronze/Raw_data/Bronze/a.csv").exists());
    }
}
