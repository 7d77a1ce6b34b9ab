use super::{ObjectStorage, VersionedObject, WriteCondition};
use async_trait::async_trait;
use common::{Error, Result};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use std::sync::Arc;

/// `ObjectStorage` over any `object_store` backend.
///
/// Prefix listing follows `object_store` semantics: the prefix is matched
/// on whole path segments, so `Raw_data/Bronze` lists `Raw_data/Bronze/a.csv`
/// but `Raw_data/Bro` lists nothing.
pub struct ObjectStoreStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    /// `LocalFileSystem` has no ETag compare-and-swap (`PutMode::Update`).
    conditional_update: bool,
}

impl ObjectStoreStorage {
    pub fn new(bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
            conditional_update: true,
        }
    }

    pub fn in_memory(bucket: &str) -> Self {
        Self::new(bucket, Arc::new(InMemory::new()))
    }

    /// Stores the bucket as a directory under `root`, creating it if needed.
    pub fn local(root: impl AsRef<std::path::Path>, bucket: &str) -> Result<Self> {
        let dir = root.as_ref().join(bucket);
        std::fs::create_dir_all(&dir)?;
        let fs = LocalFileSystem::new_with_prefix(&dir)?;
        Ok(Self {
            conditional_update: false,
            ..Self::new(bucket, Arc::new(fs))
        })
    }
}

fn read_error(err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { path, .. } => Error::NotFound(path),
        other => Error::StorageRead(other.to_string()),
    }
}

fn write_error(err: object_store::Error) -> Error {
    match err {
        object_store::Error::Precondition { path, .. }
        | object_store::Error::AlreadyExists { path, .. } => Error::Conflict(path),
        other => Error::StorageWrite(other.to_string()),
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.store
            .put(&Path::from(key), PutPayload::from(data.to_vec()))
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn put_object_if(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<()> {
        let mode = match condition {
            WriteCondition::NotExists => PutMode::Create,
            WriteCondition::Matches(etag) => PutMode::Update(UpdateVersion {
                e_tag: Some(etag),
                version: None,
            }),
        };

        self.store
            .put_opts(
                &Path::from(key),
                PutPayload::from(data.to_vec()),
                PutOptions::from(mode),
            )
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn get_object_versioned(&self, key: &str) -> Result<VersionedObject> {
        let result = self.store.get(&Path::from(key)).await.map_err(read_error)?;
        let version = result.meta.e_tag.clone();
        let data = result.bytes().await.map_err(read_error)?.to_vec();
        Ok(VersionedObject { data, version })
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = (!prefix.trim_matches('/').is_empty()).then(|| Path::from(prefix));
        self.store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect::<Vec<String>>()
            .await
            .map_err(read_error)
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(read_error(e)),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn supports_conditional_update(&self) -> bool {
        self.conditional_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_not_found() {
        let storage = ObjectStoreStorage::in_memory("bronze");
        let err = storage.get_object("logs/processed.txt").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.check_file_exists("logs/processed.txt").await.unwrap());
    }

    #[tokio::test]
    async fn lists_only_under_prefix() {
        let storage = ObjectStoreStorage::in_memory("bronze");
        storage.put_object("Raw_data/Bronze/a.csv", b"a").await.unwrap();
        storage.put_object("Raw_data/Bronze/b.csv", b"b").await.unwrap();
        storage.put_object("Raw_data/Silver/c.csv", b"c").await.unwrap();

        let keys = storage.list_objects("Raw_data/Bronze").await.unwrap();
        assert_eq!(keys, vec!["Raw_data/Bronze/a.csv", "Raw_data/Bronze/b.csv"]);

        let all = storage.list_objects("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn conditional_put_rejects_stale_version() {
        let storage = ObjectStoreStorage::in_memory("silver");
        storage
            .put_object_if("log.txt", b"a", WriteCondition::NotExists)
            .await
            .unwrap();

        let err = storage
            .put_object_if("log.txt", b"b", WriteCondition::NotExists)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let current = storage.get_object_versioned("log.txt").await.unwrap();
        let etag = current.version.clone().unwrap();
        storage
            .put_object_if("log.txt", b"c", WriteCondition::Matches(etag.clone()))
            .await
            .unwrap();

        let err = storage
            .put_object_if("log.txt", b"d", WriteCondition::Matches(etag))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(storage.get_object("log.txt").await.unwrap(), b"c");
    }

    #[test]
    fn local_backend_has_no_conditional_update() {
        let dir = tempfile::tempdir().unwrap();
        let local = ObjectStoreStorage::local(dir.path(), "silver").unwrap();
        assert!(!local.supports_conditional_update());
        assert!(ObjectStoreStorage::in_memory("silver").supports_conditional_update());
    }
}
