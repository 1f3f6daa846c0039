//! Helper functions and structures for the S3-compatible object store used
//! to mirror checkpoint artifacts.

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    pub bucket: String,
    pub key: String,
}

/// Splits `s3://bucket/some/prefix` into bucket and key. A bare name is
/// taken as a bucket with an empty key.
pub fn path_to_bucket_key(path: &str) -> Result<BucketKey, Error> {
    if !path.contains("://") {
        let bucket = path.trim_matches('/');
        if bucket.is_empty() {
            return Err(anyhow!("empty bucket name"));
        }
        return Ok(BucketKey {
            bucket: bucket.to_string(),
            key: String::new(),
        });
    }

    let s3_url = Url::parse(path).map_err(|e| anyhow!("Could not parse input given: {}", e))?;
    if s3_url.scheme() != "s3" {
        return Err(anyhow!("protocol of path is not S3"));
    }

    let bucket = s3_url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or(anyhow!("something went wrong trying to retrieve bucket"))?;

    Ok(BucketKey {
        bucket: bucket.to_string(),
        key: s3_url.path().trim_matches('/').to_string(),
    })
}

/// Minimal blob interface the checkpoint mirror relies on. Keys are
/// slash-separated paths such as `state/status.json`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), Error>;

    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// id
    pub access_key_id: String,

    /// password
    pub secret_access_key: String,

    /// object store region
    pub region: String,

    /// minio url
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub client: s3::Client,
}

impl Client {
    pub fn from_conf(cfg: ClientConfig) -> Self {
        let cred = s3::config::Credentials::new(
            cfg.access_key_id,
            cfg.secret_access_key,
            None,
            None,
            "mrsort",
        );
        let region = s3::config::Region::new(cfg.region);
        let conf = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .endpoint_url(cfg.url)
            .force_path_style(true)
            .behavior_version_latest()
            .build();

        Self {
            client: s3::Client::from_conf(conf),
        }
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, Error> {
        let response = self.client.get_object().bucket(bucket).key(key).send().await;
        match response {
            Ok(output) => Ok(Some(output.body.collect().await?.into_bytes())),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

/// A bucket, optionally narrowed to a key prefix.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
    location: BucketKey,
}

impl S3BlobStore {
    pub fn new(client: Client, location: BucketKey) -> Self {
        Self { client, location }
    }

    fn object_key(&self, key: &str) -> String {
        if self.location.key.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.location.key, key)
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), Error> {
        let key = self.object_key(key);
        self.client
            .put_object(&self.location.bucket, &key, data)
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let key = self.object_key(key);
        self.client.get_object(&self.location.bucket, &key).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let key = self.object_key(key);
        self.client.delete_object(&self.location.bucket, &key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_bucket_name() {
        let location = path_to_bucket_key("mrsort-state").unwrap();
        assert_eq!(location.bucket, "mrsort-state");
        assert_eq!(location.key, "");
    }

    #[test]
    fn s3_url_with_prefix() {
        let location = path_to_bucket_key("s3://jobs/sort/run-1/").unwrap();
        assert_eq!(
            location,
            BucketKey {
                bucket: "jobs".into(),
                key: "sort/run-1".into(),
            }
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(path_to_bucket_key("http://jobs/sort").is_err());
        assert!(path_to_bucket_key("/").is_err());
    }
}
