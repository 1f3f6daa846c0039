use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Args;

use crate::checkpoint::CheckpointStore;
use crate::minio::{self, BlobStore, S3BlobStore};

/// Object store options shared by every binary that touches the checkpoint.
#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Mirror checkpoint artifacts to the object store.
    #[arg(long = "enable-s3", env = "ENABLE_S3")]
    pub enable_s3: bool,

    /// Bucket name, or `s3://bucket/prefix`.
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Object store endpoint.
    #[arg(long, env = "S3_URL", default_value = "http://127.0.0.1:9000")]
    pub s3_url: String,

    /// Object store access key / user ID.
    #[arg(long, env = "S3_ACCESS_KEY_ID", default_value = "minioadmin")]
    pub s3_access_key_id: String,

    /// Object store secret key / password.
    #[arg(long, env = "S3_SECRET_ACCESS_KEY", default_value = "minioadmin")]
    pub s3_secret_access_key: String,

    /// Object store region.
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,
}

impl MirrorArgs {
    /// The configured mirror, or `None` when mirroring is disabled.
    pub fn blob_store(&self) -> Result<Option<Arc<dyn BlobStore>>> {
        if !self.enable_s3 {
            return Ok(None);
        }
        let bucket = self
            .s3_bucket
            .as_deref()
            .ok_or_else(|| anyhow!("S3 mirroring is enabled but S3_BUCKET is not set"))?;
        let location = minio::path_to_bucket_key(bucket)?;

        let client = minio::Client::from_conf(minio::ClientConfig {
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
            region: self.s3_region.clone(),
            url: self.s3_url.clone(),
        });
        Ok(Some(Arc::new(S3BlobStore::new(client, location))))
    }

    /// Opens the checkpoint store in `state_dir`, mirrored when enabled.
    pub fn checkpoint_store(&self, state_dir: impl Into<PathBuf>) -> Result<CheckpointStore> {
        let store = CheckpointStore::new(state_dir);
        Ok(match self.blob_store()? {
            Some(mirror) => store.with_mirror(mirror),
            None => store,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        mirror: MirrorArgs,
    }

    #[test]
    fn mirror_disabled_by_default() {
        let cli = Cli::parse_from(["test"]);
        assert!(!cli.mirror.enable_s3);
        assert!(cli.mirror.blob_store().unwrap().is_none());
    }

    #[test]
    fn enabled_mirror_requires_bucket() {
        let mirror = MirrorArgs {
            enable_s3: true,
            s3_bucket: None,
            s3_url: "http://localhost:1".into(),
            s3_access_key_id: "minioadmin".into(),
            s3_secret_access_key: "minioadmin".into(),
            s3_region: "us-east-1".into(),
        };
        let err = mirror.blob_store().err().unwrap();
        assert!(err.to_string().contains("S3_BUCKET"));
    }
}
