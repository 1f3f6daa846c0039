//! Durable job state.
//!
//! Every artifact is a single JSON document under the state directory and
//! every write rewrites it whole. When a mirror is configured, writes are
//! followed by a best-effort upload to `state/<name>` and reads of a missing
//! local artifact first try to restore it from the mirror. Local files stay
//! authoritative: mirror failures are logged and never returned.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::minio::BlobStore;
use crate::planner::ReducerRanges;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Data,
    Chunks,
    Status,
    Workers,
    Ranges,
    Completed,
}

impl Artifact {
    /// Artifacts removed by [`CheckpointStore::reset`].
    pub const JOB_STATE: [Artifact; 5] = [
        Artifact::Status,
        Artifact::Data,
        Artifact::Chunks,
        Artifact::Workers,
        Artifact::Ranges,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Data => "data.json",
            Artifact::Chunks => "chunks.json",
            Artifact::Status => "status.json",
            Artifact::Workers => "workers.json",
            Artifact::Ranges => "ranges.json",
            Artifact::Completed => "completed.json",
        }
    }

    /// Key of the artifact in the mirror.
    pub fn remote_key(self) -> String {
        format!("state/{}", self.file_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Pending,
    Done,
}

/// Chunk id to progress. Serialized with decimal string keys.
pub type ChunkStatus = BTreeMap<usize, ChunkState>;

#[derive(Debug, Serialize, Deserialize)]
struct CompletionFlag {
    completed: bool,
}

/// Highest job state observable from the artifacts on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Fresh,
    DataReady,
    ChunksReady,
    MapInProgress { done: usize, total: usize },
    MapDone,
    Completed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStage::Fresh => write!(f, "fresh"),
            JobStage::DataReady => write!(f, "data ready"),
            JobStage::ChunksReady => write!(f, "chunks ready"),
            JobStage::MapInProgress { done, total } => {
                write!(f, "map in progress ({done}/{total} chunks done)")
            }
            JobStage::MapDone => write!(f, "map done"),
            JobStage::Completed => write!(f, "completed"),
        }
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
    mirror: Option<Arc<dyn BlobStore>>,
    /// Serializes read-modify-write cycles on the status artifact.
    status_lock: Mutex<()>,
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("dir", &self.dir)
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mirror: None,
            status_lock: Mutex::new(()),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn BlobStore>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /////////////////////////////////////////////////////////////////////////
    // Raw artifact access
    /////////////////////////////////////////////////////////////////////////

    async fn write_json<T: Serialize + ?Sized>(&self, artifact: Artifact, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .with_context(|| format!("encoding {}", artifact.file_name()))?;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path(artifact);
        fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!("[STATE] Saved {}", path.display());

        self.upload(artifact, Bytes::from(bytes)).await;
        Ok(())
    }

    /// Reads and decodes an artifact. Unreadable or undecodable artifacts are
    /// reported as absent.
    async fn read_json<T: DeserializeOwned>(&self, artifact: Artifact) -> Option<T> {
        if !self.exists(artifact).await {
            return None;
        }
        let path = self.path(artifact);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[STATE] Cannot read {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[STATE] Cannot decode {}: {e}", path.display());
                None
            }
        }
    }

    /// Whether the artifact is present, restoring it from the mirror first
    /// when the local copy is missing.
    pub async fn exists(&self, artifact: Artifact) -> bool {
        let path = self.path(artifact);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return true;
        }
        self.restore(artifact).await
    }

    async fn remove(&self, artifact: Artifact) -> Result<()> {
        let path = self.path(artifact);
        match fs::remove_file(&path).await {
            Ok(()) => info!("[STATE] Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        }

        if let Some(mirror) = &self.mirror {
            let key = artifact.remote_key();
            if let Err(e) = mirror.delete(&key).await {
                warn!("[STATE] Failed to remove {key} from the mirror: {e}");
            }
        }
        Ok(())
    }

    async fn upload(&self, artifact: Artifact, bytes: Bytes) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let key = artifact.remote_key();
        match mirror.put(&key, bytes).await {
            Ok(()) => debug!("[STATE] Uploaded {key}"),
            Err(e) => warn!("[STATE] Failed to upload {key}: {e}"),
        }
    }

    /// Downloads a missing artifact. Returns whether it is now present locally.
    async fn restore(&self, artifact: Artifact) -> bool {
        let Some(mirror) = &self.mirror else {
            return false;
        };
        let key = artifact.remote_key();
        let bytes = match mirror.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(e) => {
                warn!("[STATE] Failed to download {key}: {e}");
                return false;
            }
        };

        let path = self.path(artifact);
        let written = async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&path, &bytes).await
        }
        .await;
        match written {
            Ok(()) => {
                info!("[STATE] Restored {} from the mirror", path.display());
                true
            }
            Err(e) => {
                warn!("[STATE] Failed to store restored {}: {e}", path.display());
                false
            }
        }
    }

    /////////////////////////////////////////////////////////////////////////
    // Input data and chunks
    /////////////////////////////////////////////////////////////////////////

    pub async fn save_data(&self, data: &[i64]) -> Result<()> {
        self.write_json(Artifact::Data, data).await?;
        info!("[STATE] Saved {} generated keys", data.len());
        Ok(())
    }

    pub async fn load_data(&self) -> Option<Vec<i64>> {
        self.read_json(Artifact::Data).await
    }

    pub async fn save_chunks(&self, chunks: &[Vec<i64>]) -> Result<()> {
        self.write_json(Artifact::Chunks, chunks).await?;
        info!("[STATE] Saved {} chunks", chunks.len());
        Ok(())
    }

    pub async fn load_chunks(&self) -> Option<Vec<Vec<i64>>> {
        self.read_json(Artifact::Chunks).await
    }

    /////////////////////////////////////////////////////////////////////////
    // Chunk status
    /////////////////////////////////////////////////////////////////////////

    /// Writes a status with chunks `0..n` all pending.
    pub async fn init_status(&self, n: usize) -> Result<()> {
        let status: ChunkStatus = (0..n).map(|id| (id, ChunkState::Pending)).collect();
        let _guard = self.status_lock.lock().await;
        self.write_json(Artifact::Status, &status).await?;
        info!("[STATE] Initialized status for {n} chunks");
        Ok(())
    }

    /// Moves chunk `id` to done. Marking a done chunk again changes nothing.
    pub async fn mark_done(&self, id: usize) -> Result<()> {
        let _guard = self.status_lock.lock().await;

        let Some(mut status) = self.read_json::<ChunkStatus>(Artifact::Status).await else {
            bail!("cannot mark chunk {id} done: no readable status artifact");
        };
        match status.get(&id) {
            Some(ChunkState::Done) => {
                debug!("[STATE] Chunk {id} already done");
                return Ok(());
            }
            Some(ChunkState::Pending) => {}
            None => bail!("cannot mark chunk {id} done: unknown chunk"),
        }

        status.insert(id, ChunkState::Done);
        self.write_json(Artifact::Status, &status).await?;
        info!("[STATE] Chunk {id} -> done");
        Ok(())
    }

    pub async fn load_status(&self) -> Option<ChunkStatus> {
        let _guard = self.status_lock.lock().await;
        self.read_json(Artifact::Status).await
    }

    /// True iff a status exists and every chunk in it is done.
    pub async fn all_done(&self) -> bool {
        match self.load_status().await {
            Some(status) => status.values().all(|state| *state == ChunkState::Done),
            None => false,
        }
    }

    /// Pending chunks with their ids. `None` when status or chunks are missing.
    pub async fn pending_chunks(&self) -> Option<Vec<(usize, Vec<i64>)>> {
        let status = self.load_status().await?;
        let chunks = self.load_chunks().await?;

        let pending: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .filter(|(id, _)| status.get(id) != Some(&ChunkState::Done))
            .collect();
        info!("[RECOVERY] Found {} pending chunks", pending.len());
        Some(pending)
    }

    /////////////////////////////////////////////////////////////////////////
    // Workers and ranges
    /////////////////////////////////////////////////////////////////////////

    pub async fn save_workers(&self, workers: &[WorkerConfig]) -> Result<()> {
        self.write_json(Artifact::Workers, workers).await
    }

    pub async fn load_workers(&self) -> Option<Vec<WorkerConfig>> {
        self.read_json(Artifact::Workers).await
    }

    pub async fn save_ranges(&self, ranges: &ReducerRanges) -> Result<()> {
        self.write_json(Artifact::Ranges, ranges).await
    }

    pub async fn load_ranges(&self) -> Option<ReducerRanges> {
        self.read_json(Artifact::Ranges).await
    }

    /////////////////////////////////////////////////////////////////////////
    // Completion flag and lifecycle
    /////////////////////////////////////////////////////////////////////////

    pub async fn set_completed(&self) -> Result<()> {
        self.write_json(Artifact::Completed, &CompletionFlag { completed: true })
            .await?;
        info!("[STATE] Completion flag set");
        Ok(())
    }

    pub async fn completed(&self) -> bool {
        self.exists(Artifact::Completed).await
    }

    pub async fn clear_completed(&self) -> Result<()> {
        self.remove(Artifact::Completed).await
    }

    /// Removes every job artifact. The completion flag is left alone.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.status_lock.lock().await;
        for artifact in Artifact::JOB_STATE {
            self.remove(artifact).await?;
        }
        Ok(())
    }

    pub async fn stage(&self) -> JobStage {
        if self.completed().await {
            return JobStage::Completed;
        }
        if let Some(status) = self.load_status().await {
            let total = status.len();
            let done = status.values().filter(|s| **s == ChunkState::Done).count();
            return if done == total {
                JobStage::MapDone
            } else {
                JobStage::MapInProgress { done, total }
            };
        }
        if self.exists(Artifact::Chunks).await {
            return JobStage::ChunksReady;
        }
        if self.exists(Artifact::Data).await {
            return JobStage::DataReady;
        }
        JobStage::Fresh
    }
}
