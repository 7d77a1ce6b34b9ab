use super::{ObjectStorage, S3Manager, VersionedObject, WriteCondition};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use common::{Error, Result};
use std::sync::Arc;

// Implement for S3
pub struct S3Storage {
    bucket: String,
    client: Arc<S3Client>,
}

impl S3Storage {
    pub async fn new(s3_manager: Arc<S3Manager>, bucket: &str) -> Result<Self> {
        let client = s3_manager.get_client(bucket).await?;

        Ok(Self {
            client,
            bucket: bucket.to_string(),
        })
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) => Error::StorageWrite(err.into_err().to_string()),
                _ => Error::StorageWrite(e.to_string()),
            })?;

        Ok(())
    }

    async fn put_object_if(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<()> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()));

        let request = match condition {
            WriteCondition::NotExists => request.if_none_match("*"),
            WriteCondition::Matches(etag) => request.if_match(etag),
        };

        request.send().await.map_err(|e| match e {
            // 412 Precondition Failed, or 409 when a concurrent conditional write won
            SdkError::ServiceError(err) if matches!(err.raw().status().as_u16(), 409 | 412) => {
                Error::Conflict(self.location(key))
            }
            SdkError::ServiceError(err) => Error::StorageWrite(err.into_err().to_string()),
            _ => Error::StorageWrite(e.to_string()),
        })?;

        Ok(())
    }

    async fn get_object_versioned(&self, key: &str) -> Result<VersionedObject> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) if err.err().is_no_such_key() => {
                    Error::NotFound(self.location(key))
                }
                SdkError::ServiceError(err) => Error::StorageRead(err.into_err().to_string()),
                _ => Error::StorageRead(e.to_string()),
            })?;

        let version = response.e_tag().map(str::to_string);
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::StorageRead(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(VersionedObject { data, version })
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| match e {
                SdkError::ServiceError(err) => Error::StorageRead(err.into_err().to_string()),
                _ => Error::StorageRead(e.to_string()),
            })?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            continuation_token = response.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => Ok(false),
            Err(e) => Err(Error::StorageRead(e.to_string())),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
